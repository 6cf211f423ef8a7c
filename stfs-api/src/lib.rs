//! On-flash data layout and device abstraction for STFS.
//!
//! This crate is the "given" layer: the chunk record types and their
//! byte-exact codec ([`types`]), the device abstraction the codec sits on
//! top of ([`device`]), the fixed geometry constants of the layout
//! ([`geometry`]), and the error type both of those raise ([`error`]). The
//! filesystem logic built on top of this layer — scanning, allocation,
//! paths, directories, files, mounting — lives in the `stfs` crate.

#![deny(missing_docs)]

pub mod device;
pub mod error;
pub mod geometry;
pub mod types;
