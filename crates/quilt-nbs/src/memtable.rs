use std::collections::HashMap;

use quilt_chunks::Chunk;
use quilt_hash::Address;

use crate::writer::TableWriter;

/// In-memory write buffer with a byte budget.
///
/// Chunks are deduplicated by address and remembered in insertion order,
/// which is the order they are laid out when the memtable is persisted as
/// a table. The memtable reports itself full when adding the next chunk
/// would exceed its budget; an oversized chunk is still accepted into an
/// empty memtable so no chunk is ever unstorable.
pub struct MemTable {
    chunks: HashMap<Address, Vec<u8>>,
    order: Vec<Address>,
    size: u64,
    budget: u64,
}

impl MemTable {
    pub fn new(budget: u64) -> Self {
        Self {
            chunks: HashMap::new(),
            order: Vec::new(),
            size: 0,
            budget,
        }
    }

    /// Buffer a chunk. Returns `false` without buffering when the chunk
    /// would push the memtable past its budget; the caller should flush
    /// and retry. Duplicate addresses are accepted and ignored.
    pub fn add(&mut self, chunk: &Chunk) -> bool {
        if self.chunks.contains_key(&chunk.address()) {
            return true;
        }
        let len = chunk.len() as u64;
        if !self.order.is_empty() && self.size + len > self.budget {
            return false;
        }
        self.order.push(chunk.address());
        self.chunks.insert(chunk.address(), chunk.data().to_vec());
        self.size += len;
        true
    }

    pub fn has(&self, address: &Address) -> bool {
        self.chunks.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&[u8]> {
        self.chunks.get(address).map(|v| v.as_slice())
    }

    /// Buffered chunk count.
    pub fn count(&self) -> u32 {
        self.order.len() as u32
    }

    /// Buffered payload bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Addresses in insertion order.
    pub fn addresses(&self) -> &[Address] {
        &self.order
    }

    /// Stage every buffered chunk into a table writer, in insertion
    /// order.
    pub fn write_to(&self, writer: &mut TableWriter) {
        for address in &self.order {
            writer.add_chunk(*address, &self.chunks[address]);
        }
    }

    /// Build the complete table image for this memtable.
    pub fn table_image(&self) -> (Vec<u8>, Address) {
        let mut writer = TableWriter::new(self.count() as u64, self.size);
        self.write_to(&mut writer);
        writer.finish()
    }
}
