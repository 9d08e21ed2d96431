//! Transform Pipeline Composition
//!
//! A pipeline is an ordered stack of [`Transform`]s sitting between the
//! buffer and the raw spill store streams. Order matters and is fixed when
//! the buffer is built:
//!
//! ```text
//! write:  caller -> T1 encode -> T2 encode -> ... -> Tn encode -> store
//! read:   caller <- T1 decode <- T2 decode <- ... <- Tn decode <- store
//! ```
//!
//! The first transform in the list is nearest the caller in BOTH directions.
//! A pipeline of `[compress, encrypt]` therefore compresses before it
//! encrypts on the way down, and decrypts before it decompresses on the way
//! up - the only stacking where the compressor ever sees compressible data.
//!
//! Both chains are built with a reverse fold: the last transform wraps the
//! raw store stream, and each earlier transform wraps the result. Finishing
//! the outermost writer cascades inward layer by layer, ending at the store
//! sink, which is what lets authenticated transforms emit their tags before
//! the blob is committed.

use std::io::Read;

use crate::error::Result;
use crate::store::SpillWriter;
use crate::transform::Transform;

/// Ordered stack of transforms, fixed at buffer construction.
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Add a transform at the end of the stack (furthest from the caller).
    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Compose the write chain over the raw store sink.
    ///
    /// An empty pipeline returns the sink untouched.
    pub fn wrap_writer(&self, sink: Box<dyn SpillWriter>) -> Result<Box<dyn SpillWriter>> {
        self.transforms
            .iter()
            .rev()
            .try_fold(sink, |writer, transform| transform.wrap_writer(writer))
    }

    /// Compose the read chain over the raw store source.
    ///
    /// An empty pipeline returns the source untouched.
    pub fn wrap_reader(&self, source: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        self.transforms
            .iter()
            .rev()
            .try_fold(source, |reader, transform| transform.wrap_reader(reader))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
