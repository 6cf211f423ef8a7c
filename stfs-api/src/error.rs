//! Errors raised by the device and chunk-codec layer.
//!
//! Mirrors the shape of a typical given-layer error type: IO and bounds
//! failures get their own variants, and a transparent `anyhow` variant
//! exists for client code that wants to bolt on ad hoc failures without
//! growing this enum.

use thiserror::Error;

/// Error type used by the `stfs-api` device and codec layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// A read or program targeted an address past the end of the device.
    #[error("access past the end of the flash device")]
    OutOfBounds,

    /// The on-disk image's size does not match the geometry it was opened with.
    #[error("flash image size does not match the requested geometry")]
    SizeMismatch,

    /// `Flash::open` was called on a path that does not exist.
    #[error("tried to load a non-existing flash image")]
    NoSuchImage,

    /// `Flash::create` was called on a path that already exists.
    #[error("tried to create a flash image that already exists")]
    ImageExists,

    /// A program attempted to set a bit from 0 to 1, which real NOR flash cannot do.
    #[error("program may only clear bits, never set them: {0}")]
    NotBitSubset(&'static str),

    /// A chunk codec call was given a buffer that was not exactly `CHUNK_SIZE` bytes.
    #[error("packed chunk size was {actual}, expected {expected}")]
    BadChunkSize {
        /// The size actually supplied.
        actual: usize,
        /// The size the codec requires.
        expected: usize,
    },

    /// The first byte of a chunk did not match any known chunk type tag.
    #[error("chunk has unrecognized type tag 0x{0:02x}")]
    BadChunkTag(u8),

    /// The requested device geometry was invalid.
    #[error("invalid device geometry: {0}")]
    BadGeometry(&'static str),

    /// An I/O error occurred backing a memory-mapped flash image.
    #[error("I/O error backing the flash image")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from outside this crate that do not deserve a
    /// dedicated variant. Avoid matching on this; it exists for client
    /// convenience only.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shorthand alias for a `Result` with [`ApiError`].
pub type Result<T> = std::result::Result<T, ApiError>;
