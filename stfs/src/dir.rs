//! Directory operations: `mkdir`, `rmdir`, `opendir`/`readdir`.

use crate::alloc::{del_chunk, new_oid, store_chunk};
use crate::error::{Result, StfsError};
use crate::mount::Filesystem;
use crate::path::{packed_name, resolve, split_parent_and_name, validate_name};
use crate::scan::{find_chunk, find_inode_by_parent_name, ChunkQuery, Cursor};
use stfs_api::geometry::{NO_OID, ROOT_OID};
use stfs_api::types::{Chunk, InodeKind, InodeRecord, Oid};

/// A handle returned by `opendir`, tracking the scan position for `readdir`.
#[derive(Debug, Clone, Copy)]
pub struct DirHandle {
    oid: Oid,
    cursor: Cursor,
}

impl Filesystem {
    /// Create a new empty directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let result = self.mkdir_inner(path);
        self.record(result)
    }

    fn mkdir_inner(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = split_parent_and_name(path)?;
        validate_name(name)?;
        let parent = resolve(self.flash(), self.reserved_block(), &parent_path)?.oid;
        if find_inode_by_parent_name(self.flash(), self.reserved_block(), parent, name)?.is_some()
        {
            return Err(StfsError::Exists);
        }
        let oid = new_oid(self.flash(), self.reserved_block())?;
        let (name_len, name_buf) = packed_name(name);
        let record = InodeRecord {
            kind: InodeKind::Directory,
            name_len,
            size: 0,
            parent,
            oid,
            name: name_buf,
        };
        let (flash, reserved, rng) = self.flash_reserved_rng_mut();
        store_chunk(flash, reserved, rng, &Chunk::Inode(record))?;
        Ok(())
    }

    /// Remove the empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let result = self.rmdir_inner(path);
        self.record(result)
    }

    fn rmdir_inner(&mut self, path: &str) -> Result<()> {
        let resolved = resolve(self.flash(), self.reserved_block(), path)?;
        if resolved.oid == ROOT_OID {
            return Err(StfsError::CannotDeleteRoot);
        }
        let (cursor, inode) = resolved.location.expect("non-root resolution has a location");
        if inode.kind != InodeKind::Directory {
            return Err(StfsError::WrongObjectKind);
        }
        let has_child = find_chunk(
            self.flash(),
            self.reserved_block(),
            &ChunkQuery::Inode {
                oid: NO_OID,
                parent: inode.oid,
            },
            Cursor { block: 0, chunk: 0 },
        )?
        .is_some();
        if has_child {
            return Err(StfsError::DirectoryNotEmpty);
        }
        del_chunk(self.flash_mut(), cursor)?;
        Ok(())
    }

    /// Open a directory for iteration.
    pub fn opendir(&mut self, path: &str) -> Result<DirHandle> {
        let result = self.opendir_inner(path);
        self.record(result)
    }

    fn opendir_inner(&mut self, path: &str) -> Result<DirHandle> {
        let resolved = resolve(self.flash(), self.reserved_block(), path)?;
        if let Some((_, inode)) = &resolved.location {
            if inode.kind != InodeKind::Directory {
                return Err(StfsError::WrongObjectKind);
            }
        }
        Ok(DirHandle {
            oid: resolved.oid,
            cursor: Cursor { block: 0, chunk: 0 },
        })
    }

    /// Advance `handle` and return its next entry, or `None` at the end.
    pub fn readdir(&self, handle: &mut DirHandle) -> Result<Option<InodeRecord>> {
        let query = ChunkQuery::Inode {
            oid: NO_OID,
            parent: handle.oid,
        };
        match find_chunk(self.flash(), self.reserved_block(), &query, handle.cursor)? {
            Some((cursor, Chunk::Inode(inode))) => {
                handle.cursor = cursor.advance();
                Ok(Some(inode))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::Filesystem;
    use stfs_api::device::Flash;
    use stfs_api::geometry::Geometry;

    fn mounted() -> Filesystem {
        Filesystem::mount_seeded(Flash::in_ram(Geometry::new(3).unwrap()), 1).unwrap()
    }

    #[test]
    fn mkdir_and_readdir_round_trip() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        let mut handle = fs.opendir("/a").unwrap();
        let entry = fs.readdir(&mut handle).unwrap().unwrap();
        assert_eq!(entry.name_bytes(), b"b");
        assert_eq!(entry.kind, InodeKind::Directory);
        assert!(fs.readdir(&mut handle).unwrap().is_none());
    }

    #[test]
    fn mkdir_rejects_duplicate_name() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        assert!(matches!(fs.mkdir("/a"), Err(StfsError::Exists)));
    }

    #[test]
    fn rmdir_rejects_root_and_nonempty() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        assert!(matches!(fs.rmdir("/"), Err(StfsError::CannotDeleteRoot)));
        assert!(matches!(
            fs.rmdir("/a"),
            Err(StfsError::DirectoryNotEmpty)
        ));
        fs.rmdir("/a/b").unwrap();
        fs.rmdir("/a").unwrap();
    }

    #[test]
    fn readdir_terminates_when_a_block_is_densely_full() {
        use stfs_api::geometry::{CHUNKS_PER_BLOCK, MAX_NAME};

        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        let parent = fs.opendir("/a").unwrap();
        let parent_oid = parent.oid;

        // Find a non-reserved block and pack it entirely full of live
        // children of /a, leaving no Empty tail — a scan that wraps back to
        // block 0 once it runs past this block's last entry would re-match
        // the first child here forever instead of terminating.
        let reserved = fs.reserved_block();
        let full_block = if reserved == 0 { 1 } else { 0 };
        for chunk_idx in 0..CHUNKS_PER_BLOCK as u32 {
            let mut name = [0u8; MAX_NAME];
            let label = chunk_idx.to_string();
            name[..label.len()].copy_from_slice(label.as_bytes());
            let record = InodeRecord {
                kind: InodeKind::Directory,
                name_len: label.len() as u8,
                size: 0,
                parent: parent_oid,
                oid: 1000 + chunk_idx,
                name,
            };
            fs.flash_mut()
                .program_chunk(full_block, chunk_idx, &Chunk::Inode(record).to_bytes())
                .unwrap();
        }

        let expected = CHUNKS_PER_BLOCK as u64;
        let mut handle = fs.opendir("/a").unwrap();
        let mut seen = 0u64;
        while fs.readdir(&mut handle).unwrap().is_some() {
            seen += 1;
            assert!(seen <= expected, "readdir did not terminate");
        }
        assert_eq!(seen, expected);
    }
}
