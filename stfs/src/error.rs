//! The filesystem-layer error taxonomy.
//!
//! Mirrors the teacher's layered-error shape (`InodeLayerError` wrapping
//! `BlockLayerError` wrapping the given `APIError`): [`StfsError`] wraps
//! [`stfs_api::error::ApiError`] via `#[from]` and adds one variant per
//! failure kind named in the error surface, so callers matching on a
//! specific failure never have to reach through a nested `Other`.

use thiserror::Error;

/// Error type returned by every `stfs` operation.
#[derive(Error, Debug)]
pub enum StfsError {
    /// No free descriptor slots remain in the open-file table.
    #[error("no free file descriptors")]
    NoFreeDescriptors,

    /// `open(..., CREATE)` targeted a path that already resolves.
    #[error("path already exists")]
    Exists,

    /// An operation was attempted on a descriptor that is not open.
    #[error("file descriptor is not open")]
    NotOpen,

    /// A descriptor index was out of range or otherwise invalid.
    #[error("invalid file descriptor")]
    InvalidDescriptor,

    /// The file pointer moved past the file's end without going through `lseek`.
    #[error("invalid file pointer")]
    InvalidFilePointer,

    /// A write was clamped because it would exceed `MAX_FILE_SIZE`.
    #[error("write exceeds the maximum file size and was clamped")]
    TooBig,

    /// Fewer bytes were written than requested.
    #[error("short write")]
    ShortWrite,

    /// `lseek` targeted an offset past the end of the file.
    #[error("seek past end of file")]
    NoSeekPastEof,

    /// `lseek` targeted a negative offset.
    #[error("seek before start of file")]
    NoSeekBeforeStart,

    /// A path did not resolve to any existing object.
    #[error("no such file or directory")]
    NotFound,

    /// An operation targeted an object of the wrong kind (file vs. directory).
    #[error("wrong object kind")]
    WrongObjectKind,

    /// A data chunk expected to exist (by invariant 4) was missing.
    #[error("missing data chunk")]
    MissingChunk,

    /// `truncate` was asked to grow a file.
    #[error("truncate cannot extend a file")]
    CannotExtend,

    /// A path argument did not begin with `/`.
    #[error("path is not absolute")]
    RelativePath,

    /// A path segment was empty or longer than `MAX_NAME`.
    #[error("path segment has invalid length")]
    BadNameSize,

    /// No Empty slot was available even after a vacuum attempt.
    #[error("device is full")]
    DeviceFull,

    /// A chunk codec call was given a buffer that was not exactly `CHUNK_SIZE` bytes.
    #[error("bad chunk size")]
    BadChunkSize,

    /// Vacuum could not find a block to reclaim.
    #[error("vacuum failed to find a reclaimable block")]
    VacuumFailed,

    /// A name was `.`, `..`, or otherwise not a valid path component.
    #[error("invalid name")]
    InvalidName,

    /// `open` targeted the root directory or an existing directory.
    #[error("cannot open this object as a file")]
    CannotOpenDirectory,

    /// An operation tried to remove or open-for-write the root directory.
    #[error("cannot delete the root directory")]
    CannotDeleteRoot,

    /// `open(..., CREATE)` raced another open descriptor for the same `(parent, name)`.
    #[error("already open for creation")]
    FdReopen,

    /// At `close`, the file's ancestry no longer reaches root; its data was reaped.
    #[error("file path became dangling while open")]
    Dangling,

    /// `rmdir` targeted a directory with at least one remaining entry.
    ///
    /// Not itself named in the reference error kind list, but required by
    /// the operation's own stated precondition ("require the directory to
    /// be empty"); added as a distinguishable variant so callers can match
    /// on it rather than receiving a generic failure.
    #[error("directory is not empty")]
    DirectoryNotEmpty,

    /// `mount`/`init` found no block whose first chunk is Empty.
    #[error("no block available to serve as the reserved block")]
    NoEmptyBlock,

    /// An error from the device/codec layer that doesn't map to one of the
    /// kinds above (bounds violations, bit-program violations, I/O).
    #[error(transparent)]
    Api(#[from] stfs_api::error::ApiError),
}

/// Shorthand alias for a `Result` with [`StfsError`].
pub type Result<T> = std::result::Result<T, StfsError>;

/// Numeric ordinal matching the order the reference error surface lists its
/// kinds in, for callers emulating the C ABI's `geterrno()` convention.
/// Ambient additions that have no reference counterpart continue the
/// sequence rather than colliding with a named kind.
pub fn errno_of(err: &StfsError) -> i32 {
    match err {
        StfsError::NoFreeDescriptors => 0,
        StfsError::Exists => 1,
        StfsError::NotOpen => 2,
        StfsError::InvalidDescriptor => 3,
        StfsError::InvalidFilePointer => 4,
        StfsError::TooBig => 5,
        StfsError::ShortWrite => 6,
        StfsError::NoSeekPastEof => 7,
        StfsError::NoSeekBeforeStart => 8,
        StfsError::NotFound => 9,
        StfsError::WrongObjectKind => 10,
        StfsError::MissingChunk => 11,
        StfsError::CannotExtend => 12,
        StfsError::RelativePath => 13,
        StfsError::BadNameSize => 14,
        StfsError::DeviceFull => 15,
        StfsError::BadChunkSize => 16,
        StfsError::VacuumFailed => 17,
        StfsError::InvalidName => 18,
        StfsError::CannotOpenDirectory => 19,
        StfsError::CannotDeleteRoot => 20,
        StfsError::FdReopen => 21,
        StfsError::Dangling => 22,
        StfsError::DirectoryNotEmpty => 23,
        StfsError::NoEmptyBlock => 24,
        StfsError::Api(_) => 25,
    }
}
