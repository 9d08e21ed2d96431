//! # Spoolbuf
//!
//! A byte buffer that lives in memory until it grows past a threshold, then
//! spills transparently to an external store - through an optional pipeline
//! of stream transforms (compression, authenticated encryption, checksums).
//! Callers see one sequential queue either way: writes append, reads consume
//! from the front.
//!
//! If you're new here, start with [`SpoolBuffer`] - it implements
//! `std::io::Read` and `std::io::Write` on top of its own `append`/`consume`
//! primitives, so it drops into existing I/O plumbing.
//!
//! ## Quick Start
//!
//! ```rust
//! use spoolbuf::SpoolBuffer;
//!
//! let mut buf = SpoolBuffer::builder().threshold(64 * 1024).build();
//!
//! buf.append(b"hello")?;
//! assert_eq!(buf.remaining(), 5);
//!
//! let mut out = [0u8; 16];
//! let n = buf.consume(&mut out)?;
//! assert_eq!(&out[..n], b"hello");
//!
//! buf.close()?;
//! # Ok::<(), spoolbuf::Error>(())
//! ```
//!
//! ## Spilling and Transforms
//!
//! ```ignore
//! use spoolbuf::{EncryptionTransform, Lz4Transform, SpoolBuffer};
//!
//! // Compress, then encrypt, anything that spills past 1 MiB.
//! let mut buf = SpoolBuffer::builder()
//!     .threshold(1024 * 1024)
//!     .transform(Lz4Transform::new())
//!     .transform(EncryptionTransform::new(key))
//!     .build();
//! ```

// Re-export the buffer API - this is the entry point.
pub use spoolbuf_core::{
    Error, FilesystemConfig, FilesystemStore, MemoryStore, Pipeline, Result, SpillStore,
    SpillWriter, SpoolBuffer, SpoolBufferBuilder, Transform, DEFAULT_THRESHOLD,
};

// Re-export the shipped transforms.
pub use spoolbuf_middleware::{ChecksumTransform, EncryptionTransform, Lz4Transform};
