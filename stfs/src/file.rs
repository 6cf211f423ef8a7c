//! File operations: `open`, `read`, `write`, `lseek`, `close`, `unlink`,
//! `truncate`.

use crate::alloc::{del_chunk, delete_all_data_for_oid, new_oid, store_chunk};
use crate::error::{Result, StfsError};
use crate::mount::Filesystem;
use crate::path::{packed_name, resolve, split_parent_and_name, validate_name};
use crate::scan::{find_chunk, find_inode_by_oid, find_inode_by_parent_name, ChunkQuery, Cursor};
use log::warn;
use stfs_api::error::ApiError;
use stfs_api::geometry::{DATA_PER_CHUNK, MAX_FILE_SIZE, ROOT_OID};
use stfs_api::types::{Chunk, DataRecord, InodeKind, InodeRecord, Oid, Seq};

/// Bit flags recognized by `open`. The only meaningful bit is `CREATE`,
/// whose value (64) matches the reference test harness's encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Create the object if it doesn't exist; fail if it does.
    pub const CREATE: u32 = 64;

    /// Build flags from a raw bitmask.
    pub fn from_bits(bits: u32) -> OpenFlags {
        OpenFlags(bits & Self::CREATE)
    }

    /// Plain read/write flags: no bits set.
    pub fn none() -> OpenFlags {
        OpenFlags(0)
    }

    /// Whether the `CREATE` bit is set.
    pub fn is_create(self) -> bool {
        self.0 & Self::CREATE != 0
    }
}

/// The origin an `lseek` offset is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset from the start of the file.
    Set = 0,
    /// Offset from the current file pointer.
    Cur = 1,
    /// Offset from the end of the file.
    End = 2,
}

/// An open file descriptor index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(pub usize);

/// State tracked for one open file descriptor.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub(crate) dirty: bool,
    pub(crate) inode: InodeRecord,
    pub(crate) location: Option<Cursor>,
    pub(crate) fptr: u64,
}

fn chunk_range(fptr: u64, n: u64) -> (Seq, Seq) {
    let dpc = DATA_PER_CHUNK as u64;
    let start = (fptr / dpc) as Seq;
    let end = ((fptr + n - 1) / dpc) as Seq;
    (start, end)
}

impl Filesystem {
    /// The error an invalid `fd` should raise: `InvalidDescriptor` for an
    /// index outside the open-file table, `NotOpen` for an in-range slot
    /// that is currently free — matching the reference `validfd`'s split
    /// between `E_INVFD` and `E_NOTOPEN`.
    fn descriptor_error(&self, fd: Fd) -> StfsError {
        if fd.0 >= self.open_files().len() {
            StfsError::InvalidDescriptor
        } else {
            StfsError::NotOpen
        }
    }

    /// Open (optionally creating) the file at `path`.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        let result = self.open_inner(path, flags);
        self.record(result)
    }

    fn open_inner(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        let slot = self
            .open_files()
            .iter()
            .position(|d| d.is_none())
            .ok_or(StfsError::NoFreeDescriptors)?;

        let descriptor = if flags.is_create() {
            let (parent_path, name) = split_parent_and_name(path)?;
            validate_name(name)?;
            let parent = resolve(self.flash(), self.reserved_block(), &parent_path)?.oid;

            // Checked ahead of the on-flash existence check: the first
            // `open(CREATE)` of a path already commits its inode chunk, so a
            // concurrent second `open(CREATE)` of the same path would
            // otherwise see it as EXISTS rather than the more specific
            // FDREOPEN the still-open descriptor calls for.
            let already_open = self.open_files().iter().flatten().any(|d| {
                d.inode.parent == parent && d.inode.name_bytes() == name.as_bytes()
            });
            if already_open {
                return Err(StfsError::FdReopen);
            }
            if find_inode_by_parent_name(self.flash(), self.reserved_block(), parent, name)?
                .is_some()
            {
                return Err(StfsError::Exists);
            }

            let oid = new_oid(self.flash(), self.reserved_block())?;
            let (name_len, name_buf) = packed_name(name);
            let record = InodeRecord {
                kind: InodeKind::File,
                name_len,
                size: 0,
                parent,
                oid,
                name: name_buf,
            };
            let (flash, reserved, rng) = self.flash_reserved_rng_mut();
            let location = store_chunk(flash, reserved, rng, &Chunk::Inode(record.clone()))?;
            FileDescriptor {
                dirty: true,
                inode: record,
                location: Some(location),
                fptr: 0,
            }
        } else {
            let resolved = resolve(self.flash(), self.reserved_block(), path)?;
            if resolved.oid == ROOT_OID {
                return Err(StfsError::CannotOpenDirectory);
            }
            let (cursor, inode) = resolved.location.expect("non-root resolution has a location");
            if inode.kind != InodeKind::File {
                return Err(StfsError::CannotOpenDirectory);
            }
            FileDescriptor {
                dirty: false,
                inode,
                location: Some(cursor),
                fptr: 0,
            }
        };

        self.open_files_mut()[slot] = Some(descriptor);
        Ok(Fd(slot))
    }

    /// Move the file pointer of `fd`.
    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let result = self.lseek_inner(fd, offset, whence);
        self.record(result)
    }

    fn lseek_inner(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let desc = self
            .open_files()
            .get(fd.0)
            .and_then(|d| d.as_ref())
            .ok_or_else(|| self.descriptor_error(fd))?;
        let size = desc.inode.size as i64;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => desc.fptr as i64,
            Whence::End => size,
        };
        let new_ptr = base + offset;
        if new_ptr < 0 {
            return Err(StfsError::NoSeekBeforeStart);
        }
        if new_ptr > size {
            return Err(StfsError::NoSeekPastEof);
        }
        self.open_files_mut()[fd.0].as_mut().unwrap().fptr = new_ptr as u64;
        Ok(new_ptr as u64)
    }

    /// Write `buf` to `fd` at the current file pointer, advancing it.
    ///
    /// Returns the number of bytes actually written, which may be less
    /// than `buf.len()` if the write was clamped to `MAX_FILE_SIZE`
    /// (`geterrno()` then reports `TooBig`).
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        match self.write_inner(fd, buf) {
            Ok((n, too_big)) => {
                self.set_error(if too_big { Some(StfsError::TooBig) } else { None });
                Ok(n as usize)
            }
            Err(e) => self.record(Err(e)),
        }
    }

    fn write_inner(&mut self, fd: Fd, buf: &[u8]) -> Result<(u64, bool)> {
        let (oid, size, fptr) = {
            let desc = self
                .open_files()
                .get(fd.0)
                .and_then(|d| d.as_ref())
                .ok_or_else(|| self.descriptor_error(fd))?;
            (desc.inode.oid, desc.inode.size as u64, desc.fptr)
        };
        if fptr > size {
            return Err(StfsError::InvalidFilePointer);
        }

        let max_size = MAX_FILE_SIZE as u64;
        let mut n = buf.len() as u64;
        let mut too_big = false;
        if fptr + n > max_size {
            n = max_size.saturating_sub(fptr);
            too_big = true;
        }
        if n == 0 {
            return Ok((0, too_big));
        }

        let dpc = DATA_PER_CHUNK as u64;
        let (seq_start, seq_end) = chunk_range(fptr, n);

        // Pre-pass: drop chunks the write fully supersedes, so the per-chunk
        // pass below treats them as fresh placements instead of overwrites —
        // this avoids a vacuum per overwritten chunk on a nearly-full device.
        for seq in seq_start..=seq_end {
            let chunk_start = seq as u64 * dpc;
            let chunk_end = chunk_start + dpc;
            let fully_covered = chunk_start >= fptr && chunk_end <= fptr + n && chunk_start < size;
            if fully_covered {
                if let Some((cursor, _)) = find_chunk(
                    self.flash(),
                    self.reserved_block(),
                    &ChunkQuery::Data { oid, seq },
                    Cursor { block: 0, chunk: 0 },
                )? {
                    del_chunk(self.flash_mut(), cursor)?;
                }
            }
        }

        let mut consumed = 0u64;
        for seq in seq_start..=seq_end {
            let chunk_start = seq as u64 * dpc;
            let offset_in_chunk = if chunk_start < fptr { fptr - chunk_start } else { 0 };
            let remaining = dpc - offset_in_chunk;
            let bytes_this_chunk = remaining.min(n - consumed);
            let src = &buf[consumed as usize..(consumed + bytes_this_chunk) as usize];

            let existing = find_chunk(
                self.flash(),
                self.reserved_block(),
                &ChunkQuery::Data { oid, seq },
                Cursor { block: 0, chunk: 0 },
            )?;

            match existing {
                Some((cursor, Chunk::Data(old))) => {
                    let mut payload = old.data;
                    payload[offset_in_chunk as usize..offset_in_chunk as usize + bytes_this_chunk as usize]
                        .copy_from_slice(src);
                    let new_chunk = Chunk::Data(DataRecord { seq, oid, data: payload });
                    match self
                        .flash_mut()
                        .program_chunk(cursor.block, cursor.chunk, &new_chunk.to_bytes())
                    {
                        Ok(()) => {}
                        Err(ApiError::NotBitSubset(_)) => {
                            del_chunk(self.flash_mut(), cursor)?;
                            let (flash, reserved, rng) = self.flash_reserved_rng_mut();
                            store_chunk(flash, reserved, rng, &new_chunk)?;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                _ => {
                    let mut payload = [0xFFu8; DATA_PER_CHUNK];
                    payload[offset_in_chunk as usize..offset_in_chunk as usize + bytes_this_chunk as usize]
                        .copy_from_slice(src);
                    let new_chunk = Chunk::Data(DataRecord { seq, oid, data: payload });
                    let (flash, reserved, rng) = self.flash_reserved_rng_mut();
                    store_chunk(flash, reserved, rng, &new_chunk)?;
                }
            }
            consumed += bytes_this_chunk;
        }

        let new_fptr = fptr + consumed;
        let desc = self.open_files_mut()[fd.0].as_mut().unwrap();
        if new_fptr > desc.inode.size as u64 {
            desc.inode.size = new_fptr as u16;
        }
        desc.dirty = true;
        desc.fptr = new_fptr;

        Ok((consumed, too_big))
    }

    /// Read up to `buf.len()` bytes from `fd` at the current file pointer,
    /// advancing it. Returns the number of bytes actually read, clamped to
    /// the file's remaining length.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let result = self.read_inner(fd, buf);
        self.record(result)
    }

    fn read_inner(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let (oid, size, fptr) = {
            let desc = self
                .open_files()
                .get(fd.0)
                .and_then(|d| d.as_ref())
                .ok_or_else(|| self.descriptor_error(fd))?;
            (desc.inode.oid, desc.inode.size as u64, desc.fptr)
        };
        let avail = size.saturating_sub(fptr);
        let n = (buf.len() as u64).min(avail);
        if n == 0 {
            return Ok(0);
        }

        let dpc = DATA_PER_CHUNK as u64;
        let (seq_start, seq_end) = chunk_range(fptr, n);
        let mut consumed = 0u64;
        for seq in seq_start..=seq_end {
            let chunk_start = seq as u64 * dpc;
            let offset_in_chunk = if chunk_start < fptr { fptr - chunk_start } else { 0 };
            let remaining = dpc - offset_in_chunk;
            let bytes_this_chunk = remaining.min(n - consumed);

            let found = find_chunk(
                self.flash(),
                self.reserved_block(),
                &ChunkQuery::Data { oid, seq },
                Cursor { block: 0, chunk: 0 },
            )?;
            match found {
                Some((_, Chunk::Data(data))) => {
                    let src = &data.data
                        [offset_in_chunk as usize..offset_in_chunk as usize + bytes_this_chunk as usize];
                    buf[consumed as usize..(consumed + bytes_this_chunk) as usize].copy_from_slice(src);
                }
                _ => return Err(StfsError::MissingChunk),
            }
            consumed += bytes_this_chunk;
        }

        self.open_files_mut()[fd.0].as_mut().unwrap().fptr += consumed;
        Ok(consumed as usize)
    }

    /// Close `fd`, writing back its cached inode if it changed.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let result = self.close_inner(fd);
        self.record(result)
    }

    fn close_inner(&mut self, fd: Fd) -> Result<()> {
        let err = self.descriptor_error(fd);
        let descriptor = self
            .open_files_mut()
            .get_mut(fd.0)
            .and_then(|d| d.take())
            .ok_or(err)?;

        if !descriptor.dirty {
            return Ok(());
        }

        if !self.ancestry_reaches_root(descriptor.inode.parent)? {
            delete_all_data_for_oid(self.flash_mut(), self.reserved_block(), descriptor.inode.oid)?;
            return Err(StfsError::Dangling);
        }

        match find_inode_by_oid(self.flash(), self.reserved_block(), descriptor.inode.oid)? {
            None => {
                delete_all_data_for_oid(self.flash_mut(), self.reserved_block(), descriptor.inode.oid)?;
            }
            Some((_, on_flash)) if on_flash.kind == InodeKind::Directory => {
                delete_all_data_for_oid(self.flash_mut(), self.reserved_block(), descriptor.inode.oid)?;
            }
            Some((cursor, on_flash)) => {
                if on_flash != descriptor.inode {
                    del_chunk(self.flash_mut(), cursor)?;
                    let (flash, reserved, rng) = self.flash_reserved_rng_mut();
                    store_chunk(flash, reserved, rng, &Chunk::Inode(descriptor.inode))?;
                }
            }
        }
        Ok(())
    }

    /// Walk from `parent_oid` up through ancestors to root, verifying every
    /// intermediate node is still a live directory. Used by `close` to
    /// detect whether the file's path was severed while it was open.
    fn ancestry_reaches_root(&self, parent_oid: Oid) -> Result<bool> {
        let mut cur = parent_oid;
        loop {
            if cur == ROOT_OID {
                return Ok(true);
            }
            match find_inode_by_oid(self.flash(), self.reserved_block(), cur)? {
                Some((_, inode)) if inode.kind == InodeKind::Directory => {
                    cur = inode.parent;
                }
                _ => return Ok(false),
            }
        }
    }

    /// Delete the file at `path` and all of its data chunks.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let result = self.unlink_inner(path);
        self.record(result)
    }

    fn unlink_inner(&mut self, path: &str) -> Result<()> {
        let resolved = resolve(self.flash(), self.reserved_block(), path)?;
        if resolved.oid == ROOT_OID {
            return Err(StfsError::CannotDeleteRoot);
        }
        let (cursor, inode) = resolved.location.expect("non-root resolution has a location");
        if inode.kind != InodeKind::File {
            return Err(StfsError::WrongObjectKind);
        }
        del_chunk(self.flash_mut(), cursor)?;
        delete_all_data_for_oid(self.flash_mut(), self.reserved_block(), inode.oid)?;
        Ok(())
    }

    /// Shrink the file at `path` to `length` bytes. Growing is rejected.
    pub fn truncate(&mut self, path: &str, length: u16) -> Result<()> {
        let result = self.truncate_inner(path, length);
        self.record(result)
    }

    fn truncate_inner(&mut self, path: &str, length: u16) -> Result<()> {
        let resolved = resolve(self.flash(), self.reserved_block(), path)?;
        if resolved.oid == ROOT_OID {
            return Err(StfsError::CannotDeleteRoot);
        }
        let (cursor, inode) = resolved.location.expect("non-root resolution has a location");
        if inode.kind != InodeKind::File {
            return Err(StfsError::WrongObjectKind);
        }
        if length > inode.size {
            return Err(StfsError::CannotExtend);
        }

        let mut new_inode = inode.clone();
        new_inode.size = length;
        let (flash, reserved, rng) = self.flash_reserved_rng_mut();
        store_chunk(flash, reserved, rng, &Chunk::Inode(new_inode))?;
        del_chunk(self.flash_mut(), cursor)?;

        let dpc = DATA_PER_CHUNK as u64;
        let seq_last = (length as u64 / dpc) as Seq;
        let remainder = (length as u64 % dpc) as usize;

        if remainder > 0 {
            if let Some((old_cursor, old_data)) = find_chunk(
                self.flash(),
                self.reserved_block(),
                &ChunkQuery::Data {
                    oid: inode.oid,
                    seq: seq_last,
                },
                Cursor { block: 0, chunk: 0 },
            )?
            .and_then(|(c, chunk)| match chunk {
                Chunk::Data(d) => Some((c, d)),
                _ => None,
            }) {
                let mut payload = [0xFFu8; DATA_PER_CHUNK];
                payload[..remainder].copy_from_slice(&old_data.data[..remainder]);
                del_chunk(self.flash_mut(), old_cursor)?;
                let (flash, reserved, rng) = self.flash_reserved_rng_mut();
                store_chunk(
                    flash,
                    reserved,
                    rng,
                    &Chunk::Data(DataRecord {
                        seq: seq_last,
                        oid: inode.oid,
                        data: payload,
                    }),
                )?;
            } else {
                warn!(
                    "truncate: boundary chunk seq {} missing for oid {}",
                    seq_last, inode.oid
                );
            }
        }

        // When the new length lands exactly on a chunk boundary there is no
        // boundary chunk to repad above: seq_last itself is now entirely
        // past the new EOF and must be dropped along with everything after it.
        let delete_from = if remainder > 0 { seq_last + 1 } else { seq_last };
        for (cursor, data) in crate::scan::all_data_for_oid(self.flash(), self.reserved_block(), inode.oid)? {
            if data.seq >= delete_from {
                del_chunk(self.flash_mut(), cursor)?;
            }
        }

        Ok(())
    }
}
