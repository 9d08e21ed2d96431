//! LZ4 Frame Compression Transform
//!
//! Compresses the spill stream with the LZ4 frame format. The frame format
//! is self-delimiting, so decode needs no out-of-band length - exactly what
//! the transform contract asks for. Finishing the writer drains the frame
//! trailer into the inner sink before finishing it, which is what makes the
//! stream decodable after the buffer switches from appending to draining.

use std::io::{self, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use spoolbuf_core::{Error, Result, SpillWriter, Transform};

/// LZ4 frame compression for spill streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Transform;

impl Lz4Transform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for Lz4Transform {
    fn wrap_writer(&self, inner: Box<dyn SpillWriter>) -> Result<Box<dyn SpillWriter>> {
        Ok(Box::new(Lz4Writer {
            encoder: Some(FrameEncoder::new(inner)),
        }))
    }

    fn wrap_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(FrameDecoder::new(inner)))
    }
}

struct Lz4Writer {
    /// Taken on finish; the frame trailer is only emitted by consuming the
    /// encoder.
    encoder: Option<FrameEncoder<Box<dyn SpillWriter>>>,
}

impl Write for Lz4Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "lz4 stream already finished",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl SpillWriter for Lz4Writer {
    fn finish(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let mut inner = encoder
                .finish()
                .map_err(|e| Error::Pipeline(format!("lz4 frame finish: {e}")))?;
            inner.finish()?;
        }
        Ok(())
    }
}
