use quilt_hash::Address;

use crate::table::{build_index_and_footer, max_table_size};

/// Builds a table image in memory.
///
/// Chunks are appended in write order; `finish` sorts the index, appends
/// the footer, and returns the completed image with its content-derived
/// name. The buffer is pre-sized from [`max_table_size`] so appends never
/// reallocate.
pub struct TableWriter {
    buf: Vec<u8>,
    staged: Vec<(Address, u32)>,
}

impl TableWriter {
    /// Create a writer sized for `count` chunks totalling `total_data`
    /// payload bytes.
    pub fn new(count: u64, total_data: u64) -> Self {
        Self {
            buf: Vec::with_capacity(max_table_size(count, total_data) as usize),
            staged: Vec::with_capacity(count as usize),
        }
    }

    /// Append one chunk payload.
    pub fn add_chunk(&mut self, address: Address, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.staged.push((address, data.len() as u32));
    }

    /// Number of chunks staged so far.
    pub fn chunk_count(&self) -> u32 {
        self.staged.len() as u32
    }

    /// Finish the table: emit index + footer, compute the name.
    pub fn finish(mut self) -> (Vec<u8>, Address) {
        let (tail, name) = build_index_and_footer(&self.staged);
        self.buf.extend_from_slice(&tail);
        (self.buf, name)
    }
}
