use std::collections::HashMap;
use std::sync::RwLock;

use quilt_hash::Address;

use crate::chunk::Chunk;
use crate::error::ChunkResult;
use crate::traits::ChunkStore;

/// In-memory, HashMap-backed chunk store.
///
/// Intended for tests and embedding. Pending chunks become "durable"
/// (visible to the committed set) on `commit`, mirroring the buffering
/// discipline of the durable store so callers exercise the same
/// put-then-commit sequence everywhere.
pub struct MemoryChunkStore {
    inner: RwLock<Inner>,
}

struct Inner {
    chunks: HashMap<Address, Vec<u8>>,
    pending: HashMap<Address, Vec<u8>>,
    root: Address,
}

impl MemoryChunkStore {
    /// Create a new empty store with the empty root.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                chunks: HashMap::new(),
                pending: HashMap::new(),
                root: Address::EMPTY,
            }),
        }
    }

    /// Number of committed chunks.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").chunks.len()
    }

    /// Returns `true` if no chunk has been committed.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").chunks.is_empty()
    }

    /// Number of chunks buffered but not yet committed.
    pub fn pending_len(&self) -> usize {
        self.inner.read().expect("lock poisoned").pending.len()
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn get(&self, address: &Address) -> ChunkResult<Chunk> {
        let inner = self.inner.read().expect("lock poisoned");
        let found = inner
            .pending
            .get(address)
            .or_else(|| inner.chunks.get(address));
        Ok(match found {
            Some(data) => Chunk::from_parts(*address, data.clone()),
            None => Chunk::empty(),
        })
    }

    fn has(&self, address: &Address) -> ChunkResult<bool> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.pending.contains_key(address) || inner.chunks.contains_key(address))
    }

    fn put(&self, chunk: Chunk) -> ChunkResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if !inner.chunks.contains_key(&chunk.address()) {
            inner.pending.insert(chunk.address(), chunk.into_data());
        }
        Ok(())
    }

    fn root(&self) -> ChunkResult<Address> {
        Ok(self.inner.read().expect("lock poisoned").root)
    }

    fn commit(&self, new: Address, expected: Address) -> ChunkResult<bool> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.root != expected {
            return Ok(false);
        }
        let pending = std::mem::take(&mut inner.pending);
        inner.chunks.extend(pending);
        inner.root = new;
        Ok(true)
    }

    fn rebase(&self) -> ChunkResult<()> {
        // All state is local; nothing external to re-read.
        Ok(())
    }

    fn stats_summary(&self) -> String {
        let inner = self.inner.read().expect("lock poisoned");
        format!(
            "chunks: {}, pending: {}, root: {}",
            inner.chunks.len(),
            inner.pending.len(),
            inner.root
        )
    }
}

impl std::fmt::Debug for MemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChunkStore")
            .field("chunks", &self.len())
            .field("pending", &self.pending_len())
            .finish()
    }
}
