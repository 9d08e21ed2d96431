//! Spool Buffer - Hybrid Memory/Spill Byte Queue
//!
//! This module implements [`SpoolBuffer`], a sequential byte queue that
//! lives in memory until a configurable threshold is crossed, then spills
//! transparently to an external store - with an optional transform pipeline
//! (compression, authenticated encryption, ...) between the two.
//!
//! ## What Does SpoolBuffer Do?
//!
//! 1. **Accumulates appends** in a growable memory region
//! 2. **Spills eagerly** on the first append that would exceed the threshold:
//!    the whole memory prefix is copied through the pipeline into a freshly
//!    created spill store before the triggering append proceeds
//! 3. **Serves reads** from memory or, once spilled, from the decoded spill
//!    stream - callers see one logical byte queue either way
//! 4. **Finalizes before reading**: the first consumer call after spilled
//!    appends finishes the write stream (flushing frame trailers and
//!    authentication tags) before the read stream is opened
//! 5. **Cleans up after itself**: `reset`/`close`/drop release streams and
//!    remove the spill blob on every exit path
//!
//! ## Lifecycle
//!
//! ```text
//!              append                    append                  consume
//! [ memory ] ----------> [ spill/append ] ----> (finish write) ----------> [ spill/drain ]
//!     |  ^                                                                       |
//!     |  '--------------------------- reset / truncate(0) ---------------------'
//!     '----- consume (reads straight from the memory region, no I/O) ------>
//! ```
//!
//! The memory -> spill move is one-way within a cycle; `reset` (and
//! `truncate`, which is built on it) starts a fresh cycle in memory mode.
//! Once draining has begun, further appends are rejected: the store contract
//! has no way to reopen a committed blob for writing.
//!
//! ## Example
//!
//! ```ignore
//! use spoolbuf_core::SpoolBuffer;
//!
//! let mut buf = SpoolBuffer::builder()
//!     .threshold(64 * 1024)
//!     .build();
//!
//! buf.append(b"some bytes")?;
//!
//! let mut out = vec![0u8; 10];
//! let n = buf.consume(&mut out)?;
//! assert_eq!(&out[..n], b"some bytes");
//!
//! buf.close()?;
//! ```
//!
//! ## Thread Safety
//!
//! SpoolBuffer is NOT internally synchronized. It is a single-owner queue:
//! every operation takes `&mut self`, appends are strictly ordered, and the
//! consume path is stateful (offset, stream handles). It is `Send`, so it
//! can be handed between threads; sharing requires an external lock.

use std::io::{self, Read, Write};

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::store::{FilesystemStore, SpillStore, SpillWriter};
use crate::transform::Transform;

/// Default memory residency bound before spilling (2 MiB).
pub const DEFAULT_THRESHOLD: usize = 2 * 1024 * 1024;

type StoreFactory = Box<dyn Fn() -> Box<dyn SpillStore> + Send>;

/// Which tier currently holds the logical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Memory,
    Spill,
}

/// Hybrid memory/spill byte queue.
///
/// Writes append at the tail, reads consume from the head, and the caller
/// never needs to know which tier the bytes are on. See the module docs for
/// the state machine.
pub struct SpoolBuffer {
    /// Memory residency bound; crossing it triggers the spill.
    threshold: usize,

    /// Memory region; authoritative only while in memory mode.
    memory: BytesMut,

    /// Total bytes ever appended. Never decremented by reads.
    size: u64,

    /// Bytes already consumed. Always <= size.
    offset: u64,

    mode: Mode,

    /// Set once a consumer has run in spill mode; appends are rejected after.
    draining: bool,

    /// Invoked once per spill transition (and once more per reset cycle).
    store_factory: StoreFactory,

    store: Option<Box<dyn SpillStore>>,

    pipeline: Pipeline,

    /// Pipeline-wrapped writer over the store; spill append phase only.
    write_stream: Option<Box<dyn SpillWriter>>,

    /// Pipeline-wrapped reader over the store; spill drain phase only.
    read_stream: Option<Box<dyn Read + Send>>,
}

impl SpoolBuffer {
    /// Buffer with all defaults: 2 MiB threshold, filesystem spill store in
    /// the OS temp directory, empty pipeline.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SpoolBufferBuilder {
        SpoolBufferBuilder::new()
    }

    /// Buffer pre-loaded with `data`, using all defaults.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut buf = Self::new();
        buf.append(data)?;
        Ok(buf)
    }

    /// Append `data` to the logical tail.
    ///
    /// Spills first if this append would push the memory region past the
    /// threshold. Returns the number of bytes accepted; `size` grows by
    /// exactly that count, including on error paths where the stream
    /// acknowledged a partial write.
    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.draining {
            return Err(Error::SequencingViolation);
        }

        if self.mode == Mode::Memory && self.memory.len() + data.len() > self.threshold {
            self.spill()?;
        }

        match self.mode {
            Mode::Memory => {
                self.memory.extend_from_slice(data);
                self.size += data.len() as u64;
                Ok(data.len())
            }
            Mode::Spill => {
                let stream = self.write_stream.as_mut().ok_or_else(|| {
                    Error::StoreUnavailable("spill write stream is closed".to_string())
                })?;
                let (moved, err) = write_all_counted(stream, data);
                self.size += moved as u64;
                match err {
                    Some(e) => Err(e),
                    None => Ok(moved),
                }
            }
        }
    }

    /// Fill `out` with up to `out.len()` bytes from the head.
    ///
    /// Returns the number of bytes produced; zero means the queue is fully
    /// consumed (or `out` was empty). The first consume after spilled
    /// appends finalizes the write stream before any read happens, so
    /// transforms with trailing state decode correctly.
    pub fn consume(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.offset >= self.size {
            return Ok(0);
        }

        self.begin_drain()?;

        let want = (self.size - self.offset).min(out.len() as u64) as usize;
        if want == 0 {
            return Ok(0);
        }

        let produced = match self.mode {
            Mode::Memory => {
                let start = self.offset as usize;
                out[..want].copy_from_slice(&self.memory[start..start + want]);
                want
            }
            Mode::Spill => {
                self.ensure_read_stream()?;
                let left = self.size - self.offset;
                let stream = self.read_stream.as_mut().ok_or_else(|| {
                    Error::StoreUnavailable("spill read stream is closed".to_string())
                })?;
                loop {
                    match stream.read(&mut out[..want]) {
                        Ok(0) => {
                            return Err(Error::StoreCorrupt(format!(
                                "spill stream ended {left} bytes before the logical end"
                            )))
                        }
                        Ok(n) => break n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(Error::from_read(e)),
                    }
                }
            }
        };

        self.offset += produced as u64;
        Ok(produced)
    }

    /// Unconsumed bytes: `total_size() - consumed`.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    /// Total bytes ever appended this cycle.
    pub fn total_size(&self) -> u64 {
        self.size
    }

    /// Memory headroom before the next append would spill. Zero once
    /// spilled. Advisory only.
    pub fn available(&self) -> usize {
        match self.mode {
            Mode::Memory => self.threshold.saturating_sub(self.memory.len()),
            Mode::Spill => 0,
        }
    }

    pub fn is_spilled(&self) -> bool {
        self.mode == Mode::Spill
    }

    /// Grow the memory region's capacity by at least `additional` bytes.
    /// Ignored once spilled.
    pub fn reserve(&mut self, additional: usize) {
        if self.mode == Mode::Memory {
            self.memory.reserve(additional);
        }
    }

    /// Return the buffer to its freshly built state, keeping configuration.
    ///
    /// Streams are finalized best-effort and the spill blob is removed;
    /// every release step runs even if an earlier one fails, and the first
    /// failure is reported.
    pub fn reset(&mut self) -> Result<()> {
        let first_err = self.release();

        self.memory.clear();
        self.size = 0;
        self.offset = 0;
        self.mode = Mode::Memory;
        self.draining = false;
        debug!("buffer reset");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Shrink the logical content to its first `n` bytes.
    ///
    /// `n` must not exceed `total_size()`. The consumed position becomes
    /// `min(old_offset, n)`. `truncate(0)` is `reset`. In spill mode this
    /// rematerializes the head through a scratch buffer, which is O(n) in
    /// time and transient memory.
    pub fn truncate(&mut self, n: u64) -> Result<()> {
        if n > self.size {
            return Err(Error::OutOfRange {
                requested: n,
                size: self.size,
            });
        }
        if n == 0 {
            return self.reset();
        }

        let old_offset = self.offset;

        if self.mode == Mode::Memory {
            self.memory.truncate(n as usize);
            self.size = n;
            self.offset = old_offset.min(n);
            return Ok(());
        }

        // Spill mode: replay the head from the start of the stream, then
        // rebuild the buffer around it.
        self.read_stream = None;
        self.offset = 0;

        let mut scratch = vec![0u8; n as usize];
        self.read_exact_logical(&mut scratch)?;

        let reset_err = self.reset().err();
        self.append(&scratch)?;
        self.offset = old_offset.min(n);

        match reset_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release streams and remove the spill blob. Idempotent.
    ///
    /// All release steps run even when earlier ones fail; the first error
    /// encountered is returned. The buffer's counters are left alone - use
    /// [`SpoolBuffer::reset`] to make it reusable instead.
    pub fn close(&mut self) -> Result<()> {
        let first_err = self.release();
        debug!("buffer closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Append everything `reader` yields until EOF. Returns bytes moved.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> Result<u64> {
        let mut scratch = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut scratch) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.append(&scratch[..n])?;
            total += n as u64;
        }
    }

    /// Consume everything remaining into `writer`. Returns bytes moved.
    pub fn drain_to<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        let mut scratch = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = self.consume(&mut scratch)?;
            if n == 0 {
                return Ok(total);
            }
            writer.write_all(&scratch[..n])?;
            total += n as u64;
        }
    }

    /// Consume everything remaining into a vector.
    ///
    /// This CONSUMES the queue: a second call returns an empty vector. It
    /// also materializes all remaining bytes in memory, so use it on
    /// buffers you know to be reasonably sized.
    pub fn drain_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.remaining() as usize);
        self.drain_to(&mut out)?;
        Ok(out)
    }

    /// Consume everything remaining into a string, replacing invalid UTF-8
    /// sequences. Same consumption caveats as [`SpoolBuffer::drain_to_vec`].
    pub fn drain_to_string(&mut self) -> Result<String> {
        let bytes = self.drain_to_vec()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // ---------------------------------------------------------------
    // State transitions
    // ---------------------------------------------------------------

    /// Move the buffer to spill mode: create the store, open the pipeline
    /// writer, and push the whole memory prefix through it.
    ///
    /// On any failure the store is removed best-effort and the buffer stays
    /// in memory mode with its content intact, so the caller can retry.
    fn spill(&mut self) -> Result<()> {
        let mut store = (self.store_factory)();

        let sink = match store.create() {
            Ok(sink) => sink,
            Err(e) => {
                let _ = store.remove();
                return Err(e);
            }
        };

        let mut stream = match self.pipeline.wrap_writer(sink) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = store.remove();
                return Err(e);
            }
        };

        let (_, err) = write_all_counted(&mut stream, &self.memory);
        if let Some(e) = err {
            drop(stream);
            let _ = store.remove();
            return Err(e);
        }

        debug!(
            spilled = self.memory.len(),
            threshold = self.threshold,
            "memory threshold crossed, spilling to store"
        );

        self.memory.clear();
        self.store = Some(store);
        self.write_stream = Some(stream);
        self.mode = Mode::Spill;
        Ok(())
    }

    /// Single entry point for the append -> drain phase change. Every
    /// consumer path goes through here, so the write stream is always
    /// finalized (trailers, tags) before a read stream can exist.
    fn begin_drain(&mut self) -> Result<()> {
        if self.mode != Mode::Spill || self.draining {
            return Ok(());
        }
        self.draining = true;

        if let Some(mut stream) = self.write_stream.take() {
            stream.finish()?;
            debug!(total = self.size, "spill write stream finished");
        }
        Ok(())
    }

    /// Open the decoded read stream on demand and skip whatever was already
    /// consumed while the buffer was memory-resident, so the logical read
    /// position survives the transition.
    fn ensure_read_stream(&mut self) -> Result<()> {
        if self.read_stream.is_some() {
            return Ok(());
        }

        let store = self.store.as_mut().ok_or_else(|| {
            Error::StoreUnavailable("spill store has been released".to_string())
        })?;

        let source = store.open()?;
        let mut stream = self.pipeline.wrap_reader(source)?;

        if self.offset > 0 {
            let mut head = (&mut stream).take(self.offset);
            let skipped = io::copy(&mut head, &mut io::sink()).map_err(Error::from_read)?;
            if skipped < self.offset {
                return Err(Error::StoreCorrupt(format!(
                    "spill stream ended {} bytes early while skipping the consumed head",
                    self.offset - skipped
                )));
            }
        }

        debug!(offset = self.offset, "spill read stream opened");
        self.read_stream = Some(stream);
        Ok(())
    }

    /// Consume exactly `out.len()` logical bytes.
    fn read_exact_logical(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let n = self.consume(&mut out[filled..])?;
            if n == 0 {
                return Err(Error::StoreCorrupt(format!(
                    "logical stream ended {} bytes early",
                    out.len() - filled
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Finalize and drop both streams, then remove and drop the store.
    /// Returns the first error while still running every step.
    fn release(&mut self) -> Option<Error> {
        let mut first_err: Option<Error> = None;

        if let Some(mut stream) = self.write_stream.take() {
            if let Err(e) = stream.finish() {
                first_err.get_or_insert(e);
            }
        }
        self.read_stream = None;

        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.remove() {
                first_err.get_or_insert(e);
            }
        }

        first_err
    }
}

impl Default for SpoolBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for SpoolBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stream) = self.write_stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }
}

impl Read for SpoolBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.consume(buf).map_err(Into::into)
    }
}

impl Drop for SpoolBuffer {
    fn drop(&mut self) {
        if let Some(e) = self.release() {
            warn!(error = %e, "spill cleanup failed while dropping buffer");
        }
    }
}

/// Write all of `data`, reporting how many bytes the stream acknowledged
/// alongside any failure.
fn write_all_counted<W: Write + ?Sized>(stream: &mut W, data: &[u8]) -> (usize, Option<Error>) {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => {
                return (
                    written,
                    Some(Error::ShortTransfer {
                        moved: written as u64,
                        expected: data.len() as u64,
                    }),
                )
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (written, Some(e.into())),
        }
    }
    (written, None)
}

// ---------------------------------------------------------------
// Builder
// ---------------------------------------------------------------

/// Builder for [`SpoolBuffer`].
///
/// Non-positive `threshold`/`prealloc` values are silently rejected and the
/// defaults retained, matching the configuration contract.
pub struct SpoolBufferBuilder {
    threshold: usize,
    prealloc: Option<usize>,
    store_factory: Option<StoreFactory>,
    pipeline: Pipeline,
}

impl SpoolBufferBuilder {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            prealloc: None,
            store_factory: None,
            pipeline: Pipeline::new(),
        }
    }

    /// Memory residency bound in bytes. Default 2 MiB.
    pub fn threshold(mut self, bytes: usize) -> Self {
        if bytes > 0 {
            self.threshold = bytes;
        }
        self
    }

    /// Initial capacity of the memory region. Default `threshold / 2`.
    pub fn prealloc(mut self, bytes: usize) -> Self {
        if bytes > 0 {
            self.prealloc = Some(bytes);
        }
        self
    }

    /// Store factory, invoked once per spill transition. Default: a
    /// [`FilesystemStore`] in the OS temp directory.
    pub fn store<S, F>(mut self, factory: F) -> Self
    where
        S: SpillStore + 'static,
        F: Fn() -> S + Send + 'static,
    {
        self.store_factory = Some(Box::new(move || -> Box<dyn SpillStore> {
            Box::new(factory())
        }));
        self
    }

    /// Append a transform to the pipeline. Repeatable; the first transform
    /// added is nearest the caller on both the write and read paths.
    pub fn transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.pipeline.push(Box::new(transform));
        self
    }

    pub fn build(self) -> SpoolBuffer {
        let prealloc = self.prealloc.unwrap_or(self.threshold / 2);
        let store_factory = self.store_factory.unwrap_or_else(|| {
            Box::new(|| -> Box<dyn SpillStore> { Box::new(FilesystemStore::new()) })
        });

        SpoolBuffer {
            threshold: self.threshold,
            memory: BytesMut::with_capacity(prealloc),
            size: 0,
            offset: 0,
            mode: Mode::Memory,
            draining: false,
            store_factory,
            store: None,
            pipeline: self.pipeline,
            write_stream: None,
            read_stream: None,
        }
    }
}

impl Default for SpoolBufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}
