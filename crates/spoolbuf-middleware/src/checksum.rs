//! CRC32 Integrity Transform
//!
//! Frames the spill stream with per-frame CRC32 checksums so corruption in
//! the store is detected at read time instead of silently handing back bad
//! bytes.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────┬───────────┬──────────┐
//! │ Payload Size │ CRC32     │ Payload  │
//! │ (4 bytes LE) │(4 bytes LE)│(N bytes) │
//! └──────────────┴───────────┴──────────┘
//! ```
//!
//! Frames are cut at a configurable target size (default 64 KiB); the last
//! frame may be shorter. A stream that ends cleanly on a frame boundary is
//! EOF; a stream that ends inside a frame is reported as corrupt, as is any
//! checksum mismatch.

use std::io::{self, Read, Write};

use bytes::BytesMut;

use spoolbuf_core::{Result, SpillWriter, Transform};

/// Target payload size per frame.
const DEFAULT_FRAME_SIZE: usize = 64 * 1024;

/// Upper bound a reader will accept for one frame. Anything larger is
/// treated as a corrupted length field rather than an allocation request.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// CRC32-framed integrity checking for spill streams.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumTransform {
    frame_size: usize,
}

impl ChecksumTransform {
    pub fn new() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }

    /// Use a custom frame payload size.
    pub fn with_frame_size(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.clamp(1, MAX_FRAME_SIZE),
        }
    }
}

impl Default for ChecksumTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ChecksumTransform {
    fn wrap_writer(&self, inner: Box<dyn SpillWriter>) -> Result<Box<dyn SpillWriter>> {
        Ok(Box::new(ChecksumWriter {
            inner,
            frame: BytesMut::with_capacity(self.frame_size),
            frame_size: self.frame_size,
        }))
    }

    fn wrap_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(ChecksumReader {
            inner,
            current: io::Cursor::new(Vec::new()),
        }))
    }
}

struct ChecksumWriter {
    inner: Box<dyn SpillWriter>,
    frame: BytesMut,
    frame_size: usize,
}

impl ChecksumWriter {
    fn emit_frame(&mut self) -> io::Result<()> {
        let payload = self.frame.split();

        let mut header = [0u8; 8];
        header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        header[4..].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        self.inner.write_all(&header)?;
        self.inner.write_all(&payload)?;
        Ok(())
    }
}

impl Write for ChecksumWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let room = self.frame_size - self.frame.len();
            let take = room.min(rest.len());
            self.frame.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.frame.len() == self.frame_size {
                self.emit_frame()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.frame.is_empty() {
            self.emit_frame()?;
        }
        self.inner.flush()
    }
}

impl SpillWriter for ChecksumWriter {
    fn finish(&mut self) -> Result<()> {
        if !self.frame.is_empty() {
            self.emit_frame()?;
        }
        self.inner.finish()
    }
}

struct ChecksumReader {
    inner: Box<dyn Read + Send>,
    /// Verified payload of the current frame.
    current: io::Cursor<Vec<u8>>,
}

impl ChecksumReader {
    /// Read and verify the next frame. Returns false on clean EOF at a
    /// frame boundary.
    fn next_frame(&mut self) -> io::Result<bool> {
        let mut len_buf = [0u8; 4];
        if !fill_or_clean_eof(&mut self.inner, &mut len_buf)? {
            return Ok(false);
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(corrupt("frame length field out of range"));
        }

        let mut crc_buf = [0u8; 4];
        read_frame_section(&mut self.inner, &mut crc_buf)?;

        let mut payload = vec![0u8; len];
        read_frame_section(&mut self.inner, &mut payload)?;

        if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
            return Err(corrupt("frame checksum mismatch"));
        }

        self.current = io::Cursor::new(payload);
        Ok(true)
    }
}

impl Read for ChecksumReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.current.read(out)?;
            if n > 0 {
                return Ok(n);
            }
            if !self.next_frame()? {
                return Ok(0);
            }
        }
    }
}

fn corrupt(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Fill `buf` exactly; `Ok(false)` when the stream ended cleanly before the
/// first byte, an error when it ended partway through.
fn fill_or_clean_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(corrupt("torn frame header at end of stream"));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Fill `buf` exactly; any EOF here means a frame was cut short.
fn read_frame_section(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(corrupt("torn frame at end of stream")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
