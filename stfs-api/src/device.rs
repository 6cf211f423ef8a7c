//! A memory-mapped (or, for tests, in-RAM) flash device and the chunk-level
//! operations built on top of it.
//!
//! Real NOR flash can only ever clear bits (turn a `1` into a `0`) when it is
//! programmed; the only way to set a bit back to `1` is to erase the entire
//! containing block. [`Flash::program`] enforces that rule against whatever
//! is already on the device, so a caller that tries to write something other
//! than a bit-subset of the current content gets a [`ApiError::NotBitSubset`]
//! instead of silently corrupting the image.
//!
//! *EXTRA*: a real device driver would not expose raw byte-range reads and
//! writes this way, instead working in fixed physical pages. We keep the
//! byte-range primitives since chunks already are the fixed unit the rest of
//! this crate works in, and exposing both would just duplicate bookkeeping.

use super::error::{ApiError, Result};
use super::geometry::{Geometry, CHUNK_SIZE};
use memmap::MmapMut;
use std::fs::{remove_file, OpenOptions};
use std::path::{Path, PathBuf};

enum Backing {
    Mapped { path: PathBuf, mmap: MmapMut },
    Ram(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped { mmap, .. } => &mmap[..],
            Backing::Ram(v) => &v[..],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Mapped { mmap, .. } => &mut mmap[..],
            Backing::Ram(v) => &mut v[..],
        }
    }
}

/// A flash device: either a memory-mapped file on disk, or an in-RAM byte
/// array used by tests that don't want filesystem side effects.
pub struct Flash {
    geometry: Geometry,
    backing: Backing,
}

impl Drop for Flash {
    fn drop(&mut self) {
        if let Backing::Mapped { path, mmap } = &mut self.backing {
            if path.exists() {
                let _ = mmap.flush();
            }
        }
    }
}

impl Flash {
    /// Create a fresh in-RAM device, entirely erased (all bytes `0xFF`).
    pub fn in_ram(geometry: Geometry) -> Flash {
        let size = geometry.total_bytes() as usize;
        Flash {
            geometry,
            backing: Backing::Ram(vec![0xFFu8; size]),
        }
    }

    /// Create a new file-backed device image at `path`, entirely erased.
    ///
    /// Fails with [`ApiError::ImageExists`] if `path` already exists.
    pub fn create<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<Flash> {
        if path.as_ref().exists() {
            return Err(ApiError::ImageExists);
        }
        let size = geometry.total_bytes();
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        f.set_len(size)?;
        let mut mmap = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
        mmap.as_mut().iter_mut().for_each(|b| *b = 0xFF);
        mmap.flush()?;
        Ok(Flash {
            geometry,
            backing: Backing::Mapped {
                path: path.as_ref().to_path_buf(),
                mmap,
            },
        })
    }

    /// Open an existing file-backed device image at `path`.
    ///
    /// Fails with [`ApiError::NoSuchImage`] if `path` does not exist, or
    /// [`ApiError::SizeMismatch`] if its size does not match `geometry`.
    pub fn open<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<Flash> {
        if !path.as_ref().exists() {
            return Err(ApiError::NoSuchImage);
        }
        let f = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        if f.metadata()?.len() != geometry.total_bytes() {
            return Err(ApiError::SizeMismatch);
        }
        let mmap = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
        Ok(Flash {
            geometry,
            backing: Backing::Mapped {
                path: path.as_ref().to_path_buf(),
                mmap,
            },
        })
    }

    /// Remove the file backing this device, if any. No-op for in-RAM devices.
    pub fn destruct(self) {
        if let Backing::Mapped { path, .. } = &self.backing {
            let _ = remove_file(path);
        }
    }

    /// The geometry this device was opened with.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Read `len` bytes starting at byte offset `addr`.
    pub fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>> {
        let total = self.geometry.total_bytes();
        if addr + len > total {
            return Err(ApiError::OutOfBounds);
        }
        let start = addr as usize;
        let end = start + len as usize;
        Ok(self.backing.as_slice()[start..end].to_vec())
    }

    /// Read the chunk at `(block, chunk)`, raw and unparsed.
    pub fn read_chunk(&self, block: u32, chunk: u32) -> Result<Vec<u8>> {
        let addr = self.geometry.chunk_offset(block, chunk);
        self.read(addr, CHUNK_SIZE as u64)
    }

    /// Program `bytes` at byte offset `addr`.
    ///
    /// Every byte of `bytes` must be a bitwise subset of the byte already at
    /// that address (`new & !old == 0`); otherwise this would require
    /// setting a bit from 0 to 1, which real flash cannot do in place. On
    /// violation, returns [`ApiError::NotBitSubset`] and leaves the device
    /// unmodified.
    pub fn program(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        let total = self.geometry.total_bytes();
        if addr + bytes.len() as u64 > total {
            return Err(ApiError::OutOfBounds);
        }
        let start = addr as usize;
        let end = start + bytes.len();
        let current = &self.backing.as_slice()[start..end];
        for (new, old) in bytes.iter().zip(current.iter()) {
            if new & !old != 0 {
                return Err(ApiError::NotBitSubset(
                    "program would set a bit from 0 to 1",
                ));
            }
        }
        self.backing.as_mut_slice()[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Program a full chunk at `(block, chunk)`. `bytes` must be exactly
    /// `CHUNK_SIZE` long.
    pub fn program_chunk(&mut self, block: u32, chunk: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != CHUNK_SIZE {
            return Err(ApiError::BadChunkSize {
                actual: bytes.len(),
                expected: CHUNK_SIZE,
            });
        }
        let addr = self.geometry.chunk_offset(block, chunk);
        self.program(addr, bytes)
    }

    /// Erase `block`, resetting every byte in it to `0xFF`.
    ///
    /// Unlike [`Flash::program`], this is allowed to set bits; it is the
    /// only operation that can.
    pub fn erase(&mut self, block: u32) -> Result<()> {
        if block >= self.geometry.nblocks() {
            return Err(ApiError::OutOfBounds);
        }
        let start = self.geometry.block_offset(block) as usize;
        let len = (self.geometry.total_bytes() / self.geometry.nblocks() as u64) as usize;
        self.backing.as_mut_slice()[start..start + len]
            .iter_mut()
            .for_each(|b| *b = 0xFF);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::PathBuf;

    fn small_geometry() -> Geometry {
        Geometry::new(Geometry::MIN_BLOCKS).unwrap()
    }

    fn image_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("fs-images-device-".to_string() + name);
        path.push("img");
        if path.exists() {
            remove_file(&path).unwrap();
        }
        create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    fn destroy(flash: Flash, path: &Path) {
        flash.destruct();
        let _ = remove_dir(path.parent().unwrap());
    }

    #[test]
    fn ram_device_starts_erased() {
        let flash = Flash::in_ram(small_geometry());
        let chunk = flash.read_chunk(0, 0).unwrap();
        assert!(chunk.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn program_rejects_setting_bits() {
        let mut flash = Flash::in_ram(small_geometry());
        flash.program_chunk(0, 0, &[0x00; CHUNK_SIZE]).unwrap();
        let all_ones = vec![0xFFu8; CHUNK_SIZE];
        assert!(matches!(
            flash.program_chunk(0, 0, &all_ones),
            Err(ApiError::NotBitSubset(_))
        ));
    }

    #[test]
    fn erase_restores_all_ones() {
        let mut flash = Flash::in_ram(small_geometry());
        flash.program_chunk(0, 0, &[0x00; CHUNK_SIZE]).unwrap();
        flash.erase(0).unwrap();
        let chunk = flash.read_chunk(0, 0).unwrap();
        assert!(chunk.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let geometry = small_geometry();
        let flash = Flash::in_ram(geometry);
        assert!(flash.read_chunk(geometry.nblocks(), 0).is_err());
    }

    #[test]
    fn file_backed_device_persists_across_reopen() {
        let path = image_path("persist");
        let geometry = small_geometry();
        let mut flash = Flash::create(&path, geometry).unwrap();
        flash.program_chunk(0, 0, &[0x00; CHUNK_SIZE]).unwrap();
        drop(flash);

        let flash = Flash::open(&path, geometry).unwrap();
        let chunk = flash.read_chunk(0, 0).unwrap();
        assert_eq!(chunk, vec![0x00; CHUNK_SIZE]);

        destroy(flash, &path);
        assert!(!path.exists());
    }

    #[test]
    fn create_on_existing_path_fails() {
        let path = image_path("exists");
        let geometry = small_geometry();
        let flash = Flash::create(&path, geometry).unwrap();
        assert!(matches!(
            Flash::create(&path, geometry),
            Err(ApiError::ImageExists)
        ));
        destroy(flash, &path);
    }

    #[test]
    fn open_missing_path_fails() {
        let path = image_path("missing");
        assert!(matches!(
            Flash::open(&path, small_geometry()),
            Err(ApiError::NoSuchImage)
        ));
    }
}
