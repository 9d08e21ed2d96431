pub mod buffer;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod transform;

pub use buffer::{SpoolBuffer, SpoolBufferBuilder, DEFAULT_THRESHOLD};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use store::{FilesystemConfig, FilesystemStore, MemoryStore, SpillStore, SpillWriter};
pub use transform::Transform;
