//! The chunk layer: immutable, content-addressed byte payloads and the
//! [`ChunkStore`] trait every storage backend implements.
//!
//! A [`Chunk`] is the unit of storage. Its address is the hash of its
//! payload, so a store never needs to trust the caller: anything it hands
//! back can be re-verified. [`MemoryChunkStore`] is the in-memory
//! implementation used by tests and by short-lived embedded databases;
//! the durable implementation lives in `quilt-nbs`.

pub mod chunk;
pub mod error;
pub mod memory;
pub mod traits;

pub use chunk::Chunk;
pub use error::{ChunkError, ChunkResult};
pub use memory::MemoryChunkStore;
pub use traits::{ChunkSink, ChunkStore};
