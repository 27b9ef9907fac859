use std::sync::Arc;

use quilt_hash::Address;
use tracing::debug;

use crate::cloud::KvTable;
use crate::conjoin::conjoin_image;
use crate::error::{with_retry, NbsResult};
use crate::memtable::MemTable;
use crate::object::ObjectPersister;
use crate::persist::{all_chunks_exist, ChunkSource, TablePersister, TableSet};
use crate::reader::TableReader;
use crate::stats::Stats;

const DEFAULT_ITEM_MAX: usize = 400 * 1024;
const DEFAULT_CHUNK_MAX: u32 = 1024;
const DEFAULT_RETRIES: u32 = 3;

/// Persists small tables as single key-value items, falling back to the
/// object store when a table exceeds the item-size or chunk-count limit.
///
/// Items are keyed `"table:" + name`. Reads try the KV item first and
/// fall through to the object path, so tables stay readable no matter
/// which side of the limit they landed on.
pub struct KvPersister {
    kv: Arc<dyn KvTable>,
    fallback: ObjectPersister,
    item_max: usize,
    chunk_max: u32,
    retries: u32,
}

impl KvPersister {
    pub fn new(kv: Arc<dyn KvTable>, fallback: ObjectPersister) -> Self {
        Self {
            kv,
            fallback,
            item_max: DEFAULT_ITEM_MAX,
            chunk_max: DEFAULT_CHUNK_MAX,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_limits(mut self, item_max: usize, chunk_max: u32) -> Self {
        self.item_max = item_max;
        self.chunk_max = chunk_max;
        self
    }

    fn item_key(name: Address) -> String {
        format!("table:{name}")
    }

    fn fits(&self, image_len: usize, chunk_count: u32) -> bool {
        image_len <= self.item_max && chunk_count <= self.chunk_max
    }

    fn persist_item(
        &self,
        image: Vec<u8>,
        name: Address,
        chunk_count: u32,
    ) -> NbsResult<ChunkSource> {
        let key = Self::item_key(name);
        with_retry(self.retries, || self.kv.put_item(&key, image.clone()))?;
        debug!(table = %name.short(), bytes = image.len(), "persisted table item");
        Ok(ChunkSource {
            name,
            chunk_count,
            reader: Arc::new(TableReader::from_bytes(image)?),
            object_key: None,
        })
    }
}

impl TablePersister for KvPersister {
    fn persist(
        &self,
        mt: &MemTable,
        existing: &TableSet,
        stats: &Stats,
    ) -> NbsResult<Option<ChunkSource>> {
        if all_chunks_exist(mt, existing) {
            Stats::bump(&stats.persists_skipped);
            return Ok(None);
        }
        let (image, name) = mt.table_image();
        if self.fits(image.len(), mt.count()) {
            Ok(Some(self.persist_item(image, name, mt.count())?))
        } else {
            Ok(Some(self.fallback.persist_image(image, name, mt.count())?))
        }
    }

    fn open(&self, name: Address, chunk_count: u32) -> NbsResult<ChunkSource> {
        if let Some(image) = self.kv.get_item(&Self::item_key(name))? {
            return Ok(ChunkSource {
                name,
                chunk_count,
                reader: Arc::new(TableReader::from_bytes(image)?),
                object_key: None,
            });
        }
        self.fallback.open(name, chunk_count)
    }

    fn conjoin_all(&self, sources: &[ChunkSource], stats: &Stats) -> NbsResult<ChunkSource> {
        let total_len: u64 = sources
            .iter()
            .map(|s| s.reader.total_data())
            .sum::<u64>()
            + crate::table::max_table_size(
                sources.iter().map(|s| s.chunk_count as u64).sum(),
                0,
            );
        let total_chunks: u64 = sources.iter().map(|s| s.chunk_count as u64).sum();

        if total_len <= self.item_max as u64 && total_chunks <= self.chunk_max as u64 {
            let (image, name, chunk_count) = conjoin_image(sources)?;
            Stats::bump(&stats.conjoins);
            self.persist_item(image, name, chunk_count)
        } else {
            self.fallback.conjoin_all(sources, stats)
        }
    }
}
