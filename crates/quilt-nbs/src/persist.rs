use std::sync::Arc;

use quilt_chunks::ChunkSink;
use quilt_hash::Address;

use crate::error::NbsResult;
use crate::memtable::MemTable;
use crate::reader::{sort_records, AddressRecord, TableReader};
use crate::stats::Stats;

/// An open, named table: the unit the block store's table set is built
/// from.
#[derive(Clone)]
pub struct ChunkSource {
    pub name: Address,
    pub chunk_count: u32,
    pub reader: Arc<TableReader>,
    /// Set when the table lives under an object-store key, which lets
    /// conjoin copy its bytes server-side instead of re-uploading them.
    pub object_key: Option<String>,
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSource")
            .field("name", &self.name)
            .field("chunk_count", &self.chunk_count)
            .field("object_key", &self.object_key)
            .finish()
    }
}

/// Builds, stores, and reopens chunk tables against one backing medium.
pub trait TablePersister: Send + Sync {
    /// Persist a memtable as a new table.
    ///
    /// Returns `None` without writing anything when every chunk in the
    /// memtable already exists in `existing` — flush-time deduplication.
    fn persist(
        &self,
        mt: &MemTable,
        existing: &TableSet,
        stats: &Stats,
    ) -> NbsResult<Option<ChunkSource>>;

    /// Reopen a previously persisted table by name.
    fn open(&self, name: Address, chunk_count: u32) -> NbsResult<ChunkSource>;

    /// Merge `sources` into a single table holding every member chunk.
    fn conjoin_all(&self, sources: &[ChunkSource], stats: &Stats) -> NbsResult<ChunkSource>;
}

/// An ordered list of open tables, newest first. Lookups consult tables
/// in order; batch operations partition their (sorted) records so each
/// table performs one linear index pass.
#[derive(Clone, Default)]
pub struct TableSet {
    sources: Vec<ChunkSource>,
}

impl TableSet {
    pub fn new(sources: Vec<ChunkSource>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[ChunkSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Total chunks across all tables.
    pub fn chunk_count(&self) -> u64 {
        self.sources.iter().map(|s| s.chunk_count as u64).sum()
    }

    pub fn get(&self, address: &Address) -> NbsResult<Option<Vec<u8>>> {
        for source in &self.sources {
            if let Some(data) = source.reader.get(address)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    pub fn has(&self, address: &Address) -> bool {
        self.sources.iter().any(|s| s.reader.has(address))
    }

    /// Mark every record found in some table. Returns `true` if any
    /// record is still unsatisfied afterwards.
    pub fn has_many(&self, records: &mut [AddressRecord]) -> bool {
        let mut remaining = !records.is_empty();
        for source in &self.sources {
            if !remaining {
                break;
            }
            remaining = source.reader.has_many(records);
        }
        remaining
    }

    /// Read every record found in some table, delivering chunks to
    /// `sink`. Returns `true` if any record remains unsatisfied.
    pub fn get_many(&self, records: &mut [AddressRecord], sink: &ChunkSink) -> NbsResult<bool> {
        let mut remaining = !records.is_empty();
        for source in &self.sources {
            if !remaining {
                break;
            }
            remaining = source.reader.get_many(records, sink)?;
        }
        Ok(remaining)
    }

    /// Sum of `calc_reads` across member tables for the given batch,
    /// counting each record only against the newest table that holds it.
    pub fn calc_reads(&self, records: &[AddressRecord], block_size: u64) -> usize {
        let mut scratch: Vec<AddressRecord> = records.to_vec();
        let mut reads = 0;
        for source in &self.sources {
            let (n, _) = source.reader.calc_reads(&scratch, block_size);
            reads += n;
            if !source.reader.has_many(&mut scratch) {
                break;
            }
        }
        reads
    }
}

/// `true` when every chunk of `mt` is already present in `existing`.
pub(crate) fn all_chunks_exist(mt: &MemTable, existing: &TableSet) -> bool {
    if mt.is_empty() {
        return true;
    }
    let mut records: Vec<AddressRecord> = mt
        .addresses()
        .iter()
        .map(|a| AddressRecord::new(*a))
        .collect();
    sort_records(&mut records);
    !existing.has_many(&mut records)
}
