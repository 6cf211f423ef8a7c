//! STFS: a log-structured, append-only filesystem for small
//! memory-mapped flash devices.
//!
//! A mounted image is represented by a single [`Filesystem`] value — the
//! open-file table, reserved-block index, PRNG, and last-error slot all
//! live on it rather than behind process-wide statics. Every mutating
//! operation reports failure both through its `Result` and through
//! [`Filesystem::geterrno`], for callers emulating the C ABI convention of
//! a single last-error integer.

pub mod alloc;
pub mod dir;
pub mod error;
pub mod file;
pub mod mount;
pub mod path;
pub mod scan;

pub use dir::DirHandle;
pub use error::{errno_of, StfsError};
pub use file::{Fd, FileDescriptor, OpenFlags, Whence};
pub use mount::Filesystem;
