//! Streaming byte codecs applied between a buffer and its spill store.
//!
//! A transform is a pair of stream adapters implementing one lossless,
//! self-delimiting codec: compression, authenticated encryption, checksum
//! framing. The write side encodes, the read side decodes, and reading back
//! everything the writer produced must yield exactly the bytes that went in.
//!
//! Finalization is part of the contract: codecs that hold trailing state
//! (frame trailers, authentication tags, padding) emit it when the wrapped
//! writer's `finish` runs, and `finish` must then cascade into the inner
//! writer. The buffer guarantees it finishes the write side before it ever
//! opens the read side.

use std::io::Read;

use crate::error::Result;
use crate::store::SpillWriter;

/// A reversible byte-stream codec.
pub trait Transform: Send {
    /// Wrap `inner` so that bytes written come out the far side encoded.
    fn wrap_writer(&self, inner: Box<dyn SpillWriter>) -> Result<Box<dyn SpillWriter>>;

    /// Wrap `inner` so that reads yield the bytes originally written,
    /// provided `inner` reproduces the encoded stream in order.
    fn wrap_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>>;
}
