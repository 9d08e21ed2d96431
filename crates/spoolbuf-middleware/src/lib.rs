//! Stream transforms for spool buffers.
//!
//! Each transform here is a reversible byte-stream codec implementing
//! [`spoolbuf_core::Transform`]: it encodes on the way into the spill store
//! and decodes on the way back out. Transforms compose through the buffer's
//! pipeline; a typical stack is compress-then-encrypt, which compresses
//! plaintext on the way down and decrypts before decompressing on the way
//! up.

pub mod checksum;
pub mod encryption;
pub mod lz4;

pub use checksum::ChecksumTransform;
pub use encryption::EncryptionTransform;
pub use lz4::Lz4Transform;
