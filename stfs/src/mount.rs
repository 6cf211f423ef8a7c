//! The mount handle: owns one mounted image's device, open-file table,
//! reserved-block index, PRNG, and last-error slot.
//!
//! Replaces the reference implementation's process-wide statics with an
//! explicit value, one per mounted image, as suggested by the reference's
//! own design notes.

use crate::error::{errno_of, Result, StfsError};
use crate::file::FileDescriptor;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stfs_api::device::Flash;
use stfs_api::geometry::MAX_OPEN_FILES;
use stfs_api::types::Chunk;

/// A mounted STFS image.
pub struct Filesystem {
    flash: Flash,
    reserved_block: u32,
    open_files: Vec<Option<FileDescriptor>>,
    rng: StdRng,
    last_error: Option<StfsError>,
}

fn pick_reserved_block<R: Rng>(flash: &Flash, rng: &mut R) -> Result<u32> {
    let nblocks = flash.geometry().nblocks();
    let mut candidates = Vec::new();
    for block in 0..nblocks {
        let first_chunk = flash.read_chunk(block, 0)?;
        if matches!(Chunk::from_bytes(&first_chunk)?, Chunk::Empty) {
            candidates.push(block);
        }
    }
    if candidates.is_empty() {
        return Err(StfsError::NoEmptyBlock);
    }
    let idx = rng.gen_range(0..candidates.len());
    Ok(candidates[idx])
}

impl Filesystem {
    /// Mount `flash`, choosing a reserved block at random from a
    /// non-deterministic source.
    pub fn mount(flash: Flash) -> Result<Filesystem> {
        Filesystem::mount_with_rng(flash, StdRng::from_entropy())
    }

    /// Mount `flash` with a seeded PRNG, for reproducible tests.
    pub fn mount_seeded(flash: Flash, seed: u64) -> Result<Filesystem> {
        Filesystem::mount_with_rng(flash, StdRng::seed_from_u64(seed))
    }

    /// Initialize and mount a brand-new, fully erased image. Shares the
    /// reserved-block selection logic with `mount`, since on a fresh image
    /// every block qualifies.
    pub fn init(flash: Flash) -> Result<Filesystem> {
        Filesystem::mount(flash)
    }

    fn mount_with_rng(flash: Flash, mut rng: StdRng) -> Result<Filesystem> {
        let reserved_block = pick_reserved_block(&flash, &mut rng)?;
        info!("mounted image, reserved block {}", reserved_block);
        Ok(Filesystem {
            flash,
            reserved_block,
            open_files: (0..MAX_OPEN_FILES).map(|_| None).collect(),
            rng,
            last_error: None,
        })
    }

    pub(crate) fn flash(&self) -> &Flash {
        &self.flash
    }

    pub(crate) fn flash_mut(&mut self) -> &mut Flash {
        &mut self.flash
    }

    pub(crate) fn reserved_block(&self) -> u32 {
        self.reserved_block
    }

    pub(crate) fn flash_reserved_rng_mut(&mut self) -> (&mut Flash, &mut u32, &mut StdRng) {
        (&mut self.flash, &mut self.reserved_block, &mut self.rng)
    }

    pub(crate) fn open_files(&self) -> &[Option<FileDescriptor>] {
        &self.open_files
    }

    pub(crate) fn open_files_mut(&mut self) -> &mut Vec<Option<FileDescriptor>> {
        &mut self.open_files
    }

    /// Record the outcome of an operation into the last-error slot and
    /// return the same result, for callers that chain operations inline.
    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.set_error(None),
            Err(e) => self.set_error(Some(clone_for_record(e))),
        }
        result
    }

    /// Directly set the last-error slot, for operations (like a clamped
    /// `write`) that still return `Ok` but want `geterrno()` to reflect a
    /// noteworthy condition.
    pub(crate) fn set_error(&mut self, err: Option<StfsError>) {
        self.last_error = err;
    }

    /// `geterrno()`-style accessor: the numeric ordinal of the last
    /// recorded failure, or `-1` if the last operation succeeded.
    pub fn geterrno(&self) -> i32 {
        match &self.last_error {
            Some(e) => errno_of(e),
            None => -1,
        }
    }
}

/// `StfsError` only derives `Error`/`Debug` (matching the teacher's own
/// error type), not `Clone`, since its `Api` variant wraps a boxed-dyn-ish
/// external error; we only need the last error's *kind* for `geterrno`, so
/// reduce to a fresh value of the same variant rather than requiring `Clone`
/// on the whole enum.
fn clone_for_record(e: &StfsError) -> StfsError {
    match e {
        StfsError::NoFreeDescriptors => StfsError::NoFreeDescriptors,
        StfsError::Exists => StfsError::Exists,
        StfsError::NotOpen => StfsError::NotOpen,
        StfsError::InvalidDescriptor => StfsError::InvalidDescriptor,
        StfsError::InvalidFilePointer => StfsError::InvalidFilePointer,
        StfsError::TooBig => StfsError::TooBig,
        StfsError::ShortWrite => StfsError::ShortWrite,
        StfsError::NoSeekPastEof => StfsError::NoSeekPastEof,
        StfsError::NoSeekBeforeStart => StfsError::NoSeekBeforeStart,
        StfsError::NotFound => StfsError::NotFound,
        StfsError::WrongObjectKind => StfsError::WrongObjectKind,
        StfsError::MissingChunk => StfsError::MissingChunk,
        StfsError::CannotExtend => StfsError::CannotExtend,
        StfsError::RelativePath => StfsError::RelativePath,
        StfsError::BadNameSize => StfsError::BadNameSize,
        StfsError::DeviceFull => StfsError::DeviceFull,
        StfsError::BadChunkSize => StfsError::BadChunkSize,
        StfsError::VacuumFailed => StfsError::VacuumFailed,
        StfsError::InvalidName => StfsError::InvalidName,
        StfsError::CannotOpenDirectory => StfsError::CannotOpenDirectory,
        StfsError::CannotDeleteRoot => StfsError::CannotDeleteRoot,
        StfsError::FdReopen => StfsError::FdReopen,
        StfsError::Dangling => StfsError::Dangling,
        StfsError::DirectoryNotEmpty => StfsError::DirectoryNotEmpty,
        StfsError::NoEmptyBlock => StfsError::NoEmptyBlock,
        StfsError::Api(_) => StfsError::DeviceFull, // coarse: any device-layer failure surfaces via its own Result already
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stfs_api::geometry::Geometry;

    #[test]
    fn mount_picks_an_empty_block() {
        let flash = Flash::in_ram(Geometry::new(3).unwrap());
        let fs = Filesystem::mount(flash).unwrap();
        assert!(fs.reserved_block() < 3);
    }

    #[test]
    fn mount_seeded_is_deterministic() {
        let g = Geometry::new(4).unwrap();
        let fs1 = Filesystem::mount_seeded(Flash::in_ram(g), 42).unwrap();
        let fs2 = Filesystem::mount_seeded(Flash::in_ram(g), 42).unwrap();
        assert_eq!(fs1.reserved_block(), fs2.reserved_block());
    }

    #[test]
    fn geterrno_is_negative_one_before_any_failure() {
        let flash = Flash::in_ram(Geometry::new(3).unwrap());
        let fs = Filesystem::mount(flash).unwrap();
        assert_eq!(fs.geterrno(), -1);
    }
}
