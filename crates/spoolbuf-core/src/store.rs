//! Spill Store Backends
//!
//! A spill store holds exactly one ephemeral blob - the overflow of a spool
//! buffer that crossed its memory threshold. The buffer drives the store
//! through a narrow lifecycle:
//!
//! ```text
//! create() -> write -> finish() -> open() -> read -> remove()
//! ```
//!
//! Closing the writer (via [`SpillWriter::finish`]) is what commits the
//! blob; a store only has to serve `open()` after a writer was cleanly
//! finished. Stores are free to checksum, retry, or encrypt at rest between
//! those two points, as long as the bytes round-trip exactly.
//!
//! `remove()` is idempotent: removing a blob that was never created, or was
//! already removed, succeeds. A store does not have to support concurrent
//! readers or writing again after the first finish. Sequential re-open of a
//! reader (open, read, drop, open again) IS expected - the buffer relies on
//! it when it rematerializes its head during truncation.
//!
//! Two backends ship here: [`FilesystemStore`], the default, which spools to
//! a uniquely named file in a configurable directory, and [`MemoryStore`],
//! which keeps the blob in process memory and is mostly useful in tests and
//! for embedders that want spill semantics without touching disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A byte sink over a spill blob.
///
/// `finish` flushes anything the writer still buffers and commits the blob,
/// so the store's `open()` sees every byte that was written. Wrapping
/// transforms cascade their own `finish` into the inner writer's, which is
/// how frame trailers and authentication tags make it to the blob.
pub trait SpillWriter: Write + Send {
    /// Flush pending state and commit the blob. Idempotent.
    fn finish(&mut self) -> Result<()>;
}

/// One ephemeral spill blob with a create/open/remove lifecycle.
///
/// Implementations dispatch at runtime; the buffer owns the store it got
/// from its factory and is the only caller.
pub trait SpillStore: Send {
    /// Open the blob for writing from byte zero.
    fn create(&mut self) -> Result<Box<dyn SpillWriter>>;

    /// Open the committed blob for sequential reading from byte zero.
    fn open(&mut self) -> Result<Box<dyn Read + Send>>;

    /// Delete the blob and release backend state. Idempotent.
    fn remove(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------

/// Configuration for [`FilesystemStore`].
#[derive(Debug, Clone)]
pub struct FilesystemConfig {
    /// Directory spill files are created in (default: the OS temp dir).
    pub directory: PathBuf,

    /// File name prefix, handy when scanning for leftover blobs.
    pub prefix: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            prefix: "spoolbuf-".to_string(),
        }
    }
}

/// Spill store backed by a uniquely named file.
///
/// The file name is the configured prefix plus a random UUID, so concurrent
/// buffers sharing a directory never collide. The file is removed on
/// `remove()` and, as a fallback, when the store is dropped.
pub struct FilesystemStore {
    config: FilesystemConfig,
    path: Option<PathBuf>,
}

impl FilesystemStore {
    /// Create a store that spools into the OS temp directory.
    pub fn new() -> Self {
        Self::with_config(FilesystemConfig::default())
    }

    pub fn with_config(config: FilesystemConfig) -> Self {
        Self { config, path: None }
    }

    /// Path of the spill file, once `create()` has run.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for FilesystemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpillStore for FilesystemStore {
    fn create(&mut self) -> Result<Box<dyn SpillWriter>> {
        let name = format!("{}{}", self.config.prefix, Uuid::new_v4());
        let path = self.config.directory.join(name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::StoreUnavailable(format!("create {}: {e}", path.display())))?;

        debug!(path = %path.display(), "spill file created");
        self.path = Some(path);

        Ok(Box::new(FileWriter {
            inner: BufWriter::new(file),
        }))
    }

    fn open(&mut self) -> Result<Box<dyn Read + Send>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| Error::StoreUnavailable("spill file was never created".to_string()))?;

        let file = File::open(path)
            .map_err(|e| Error::StoreUnavailable(format!("open {}: {e}", path.display())))?;

        Ok(Box::new(BufReader::new(file)))
    }

    fn remove(&mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "spill file removed"),
                // Already gone counts as removed.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    // Keep the path so a retry can still clean up.
                    let message = format!("remove {}: {e}", path.display());
                    self.path = Some(path);
                    return Err(Error::StoreUnavailable(message));
                }
            }
        }
        Ok(())
    }
}

impl Drop for FilesystemStore {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "leaking spill file on drop");
                }
            }
        }
    }
}

struct FileWriter {
    inner: BufWriter<File>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl SpillWriter for FileWriter {
    fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------

/// Spill store that keeps the blob in process memory.
///
/// The blob region can be shared with the caller via [`MemoryStore::with_shared`],
/// which is how tests inspect what actually landed in the store (for
/// example, that an encrypted spill does not contain the plaintext).
pub struct MemoryStore {
    blob: Arc<Mutex<Vec<u8>>>,
    created: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_shared(Arc::new(Mutex::new(Vec::new())))
    }

    /// Build a store over a caller-held blob region.
    pub fn with_shared(blob: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            blob,
            created: false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpillStore for MemoryStore {
    fn create(&mut self) -> Result<Box<dyn SpillWriter>> {
        self.blob
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.created = true;

        Ok(Box::new(MemoryWriter {
            blob: Arc::clone(&self.blob),
        }))
    }

    fn open(&mut self) -> Result<Box<dyn Read + Send>> {
        if !self.created {
            return Err(Error::StoreUnavailable(
                "memory blob was never created".to_string(),
            ));
        }

        let data = self
            .blob
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Ok(Box::new(io::Cursor::new(data)))
    }

    fn remove(&mut self) -> Result<()> {
        self.blob
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.created = false;
        Ok(())
    }
}

struct MemoryWriter {
    blob: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.blob
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SpillWriter for MemoryWriter {
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
