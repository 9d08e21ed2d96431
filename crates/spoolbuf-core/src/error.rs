//! Error Types for Spool Buffers
//!
//! This module defines all error types that can occur while operating a
//! spool buffer, its spill stores, and its transform pipeline.
//!
//! ## Error Categories
//!
//! ### Store Errors
//! - `StoreUnavailable`: The spill store could not be provisioned, opened,
//!   or removed (disk full, directory missing, backend gone)
//! - `StoreCorrupt`: The spill stream read back does not decode (checksum
//!   mismatch, failed authentication, truncated blob)
//!
//! ### Pipeline Errors
//! - `Pipeline`: A transform's encoder or decoder raised a non-I/O condition
//!
//! ### Usage Errors
//! - `SequencingViolation`: An append was attempted after draining began
//! - `OutOfRange`: A truncate bound exceeded the buffer size
//!
//! ### I/O Errors
//! - `ShortTransfer`: Fewer bytes moved than requested, with the count that
//!   actually made it
//! - `Io`: Anything the underlying byte medium reported
//!
//! End-of-stream while consuming is NOT an error - it is signalled as a
//! zero-byte read, exactly like `std::io::Read`.
//!
//! ## Usage
//!
//! All fallible operations return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagation works throughout.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("spill store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("spill data corrupt: {0}")]
    StoreCorrupt(String),

    #[error("pipeline transform failed: {0}")]
    Pipeline(String),

    #[error("buffer is draining, appends are no longer accepted")]
    SequencingViolation,

    #[error("truncate out of range: {requested} exceeds buffer size {size}")]
    OutOfRange { requested: u64, size: u64 },

    #[error("short transfer: moved {moved} of {expected} bytes")]
    ShortTransfer { moved: u64, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify an I/O failure coming back from the decode side of a spill
    /// stream. Transforms report integrity loss as `InvalidData`, and a
    /// stream that ends mid-frame as `UnexpectedEof`; both mean the blob no
    /// longer decodes to what was written.
    pub(crate) fn from_read(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                Error::StoreCorrupt(err.to_string())
            }
            _ => Error::Io(err),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        use std::io::ErrorKind;

        match err {
            Error::Io(e) => e,
            other => {
                let kind = match &other {
                    Error::StoreCorrupt(_) => ErrorKind::InvalidData,
                    Error::OutOfRange { .. } => ErrorKind::InvalidInput,
                    Error::ShortTransfer { .. } => ErrorKind::WriteZero,
                    Error::SequencingViolation => ErrorKind::Unsupported,
                    _ => ErrorKind::Other,
                };
                std::io::Error::new(kind, other)
            }
        }
    }
}
