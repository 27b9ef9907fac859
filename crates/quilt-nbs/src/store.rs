use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use quilt_chunks::{Chunk, ChunkResult, ChunkSink, ChunkStore};
use quilt_hash::Address;
use tracing::debug;

use crate::error::NbsResult;
use crate::manifest::{ManifestBackend, ManifestRecord, TableSpec};
use crate::memtable::MemTable;
use crate::persist::{ChunkSource, TablePersister, TableSet};
use crate::reader::{sort_records, AddressRecord};
use crate::stats::Stats;

/// Version tag written into every manifest this store produces.
pub const STORE_VERSION: &str = "1";

/// Tunables for a [`BlockStore`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Memtable byte budget before a flush is forced.
    pub memtable_budget: u64,
    /// Table count above which commit conjoins the table set.
    pub conjoin_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memtable_budget: 4 * 1024 * 1024,
            conjoin_threshold: 8,
        }
    }
}

struct Inner {
    mt: MemTable,
    /// Tables persisted by this view since the last manifest sync,
    /// newest first.
    novel: Vec<ChunkSource>,
    /// Tables named by the manifest, newest first.
    upstream: Vec<ChunkSource>,
    manifest: Option<ManifestRecord>,
    root: Address,
}

impl Inner {
    fn tables(&self) -> TableSet {
        TableSet::new(
            self.novel
                .iter()
                .chain(self.upstream.iter())
                .cloned()
                .collect(),
        )
    }

    fn table_specs(&self) -> Vec<TableSpec> {
        self.novel
            .iter()
            .chain(self.upstream.iter())
            .map(|s| TableSpec {
                name: s.name,
                chunk_count: s.chunk_count,
            })
            .collect()
    }
}

/// The durable chunk store: a memtable in front of an ordered set of
/// immutable tables, with all root movement serialized through the
/// manifest's compare-and-set.
///
/// Reads consult the memtable, then tables newest to oldest. `put`
/// buffers; a full memtable is swapped out atomically and persisted while
/// new puts proceed against the fresh one. `commit` flushes, conjoins the
/// table set when it has grown past the configured threshold, and
/// attempts the manifest CAS; on loss it rebases the local view and
/// reports `false` so the caller can retry.
pub struct BlockStore {
    inner: Mutex<Inner>,
    persister: Arc<dyn TablePersister>,
    manifest: Arc<dyn ManifestBackend>,
    config: StoreConfig,
    stats: Stats,
}

impl BlockStore {
    pub fn new(
        persister: Arc<dyn TablePersister>,
        manifest: Arc<dyn ManifestBackend>,
        config: StoreConfig,
    ) -> NbsResult<Self> {
        let store = Self {
            inner: Mutex::new(Inner {
                mt: MemTable::new(config.memtable_budget),
                novel: Vec::new(),
                upstream: Vec::new(),
                manifest: None,
                root: Address::EMPTY,
            }),
            persister,
            manifest,
            config,
            stats: Stats::new(),
        };
        {
            let fetched = store.manifest.fetch()?;
            let mut inner = store.lock();
            store.rebase_locked(&mut inner, fetched)?;
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock poisoned")
    }

    /// Persist the current memtable, if non-empty, as a novel table.
    fn flush(&self) -> NbsResult<()> {
        let (full, existing) = {
            let mut inner = self.lock();
            if inner.mt.is_empty() {
                return Ok(());
            }
            let full = std::mem::replace(&mut inner.mt, MemTable::new(self.config.memtable_budget));
            (full, inner.tables())
        };
        self.persist_swapped(full, existing)
    }

    fn persist_swapped(&self, full: MemTable, existing: TableSet) -> NbsResult<()> {
        Stats::bump(&self.stats.flushes);
        if let Some(source) = self.persister.persist(&full, &existing, &self.stats)? {
            debug!(table = %source.name.short(), chunks = source.chunk_count, "flushed memtable");
            self.lock().novel.insert(0, source);
        }
        Ok(())
    }

    fn rebase_locked(
        &self,
        inner: &mut Inner,
        record: Option<ManifestRecord>,
    ) -> NbsResult<()> {
        match record {
            None => {
                inner.upstream.clear();
                inner.root = Address::EMPTY;
                inner.manifest = None;
            }
            Some(record) => {
                let mut open: HashMap<Address, ChunkSource> = inner
                    .novel
                    .iter()
                    .chain(inner.upstream.iter())
                    .map(|s| (s.name, s.clone()))
                    .collect();
                let mut upstream = Vec::with_capacity(record.tables.len());
                for spec in &record.tables {
                    let source = match open.remove(&spec.name) {
                        Some(source) => source,
                        None => self.persister.open(spec.name, spec.chunk_count)?,
                    };
                    upstream.push(source);
                }
                // Anything the manifest now names is no longer novel.
                inner
                    .novel
                    .retain(|s| !record.tables.iter().any(|t| t.name == s.name));
                inner.upstream = upstream;
                inner.root = record.root;
                inner.manifest = Some(record);
            }
        }
        Ok(())
    }

    /// Physical-read estimate for a batch, for the fragmentation
    /// diagnostic.
    pub fn calc_reads(&self, addresses: &[Address], block_size: u64) -> usize {
        let mut records: Vec<AddressRecord> =
            addresses.iter().map(|a| AddressRecord::new(*a)).collect();
        sort_records(&mut records);
        let tables = {
            let inner = self.lock();
            // Memtable hits cost no physical reads.
            for r in records.iter_mut() {
                if inner.mt.has(&r.address) {
                    r.found = true;
                }
            }
            inner.tables()
        };
        tables.calc_reads(&records, block_size)
    }

    /// Number of tables currently in the local view.
    pub fn table_count(&self) -> usize {
        let inner = self.lock();
        inner.novel.len() + inner.upstream.len()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl ChunkStore for BlockStore {
    fn get(&self, address: &Address) -> ChunkResult<Chunk> {
        Stats::bump(&self.stats.gets);
        let tables = {
            let inner = self.lock();
            if let Some(data) = inner.mt.get(address) {
                Stats::bump(&self.stats.memtable_hits);
                return Ok(Chunk::from_parts(*address, data.to_vec()));
            }
            inner.tables()
        };
        match tables.get(address).map_err(crate::error::NbsError::from)? {
            Some(data) => {
                Stats::bump(&self.stats.table_hits);
                Ok(Chunk::from_parts(*address, data))
            }
            None => {
                Stats::bump(&self.stats.misses);
                Ok(Chunk::empty())
            }
        }
    }

    fn get_many(&self, addresses: &[Address], sink: &ChunkSink) -> ChunkResult<()> {
        Stats::add(&self.stats.gets, addresses.len() as u64);
        let mut records: Vec<AddressRecord> =
            addresses.iter().map(|a| AddressRecord::new(*a)).collect();
        sort_records(&mut records);

        let tables = {
            let inner = self.lock();
            for r in records.iter_mut() {
                if let Some(data) = inner.mt.get(&r.address) {
                    r.found = true;
                    Stats::bump(&self.stats.memtable_hits);
                    let _ = sink.send(Chunk::from_parts(r.address, data.to_vec()));
                }
            }
            inner.tables()
        };
        tables
            .get_many(&mut records, sink)
            .map_err(crate::error::NbsError::from)?;
        Ok(())
    }

    fn has(&self, address: &Address) -> ChunkResult<bool> {
        let tables = {
            let inner = self.lock();
            if inner.mt.has(address) {
                return Ok(true);
            }
            inner.tables()
        };
        Ok(tables.has(address))
    }

    fn has_many(&self, addresses: &[Address]) -> ChunkResult<Vec<bool>> {
        let mut records: Vec<AddressRecord> =
            addresses.iter().map(|a| AddressRecord::new(*a)).collect();
        sort_records(&mut records);

        let tables = {
            let inner = self.lock();
            for r in records.iter_mut() {
                if inner.mt.has(&r.address) {
                    r.found = true;
                }
            }
            inner.tables()
        };
        tables.has_many(&mut records);

        let by_address: HashMap<Address, bool> =
            records.iter().map(|r| (r.address, r.found)).collect();
        Ok(addresses.iter().map(|a| by_address[a]).collect())
    }

    fn put(&self, chunk: Chunk) -> ChunkResult<()> {
        Stats::bump(&self.stats.puts);
        loop {
            let (full, existing) = {
                let mut inner = self.lock();
                if inner.mt.add(&chunk) {
                    return Ok(());
                }
                let full = std::mem::replace(
                    &mut inner.mt,
                    MemTable::new(self.config.memtable_budget),
                );
                (full, inner.tables())
            };
            self.persist_swapped(full, existing)
                .map_err(quilt_chunks::ChunkError::from)?;
        }
    }

    fn root(&self) -> ChunkResult<Address> {
        Ok(self.lock().root)
    }

    fn commit(&self, new: Address, expected: Address) -> ChunkResult<bool> {
        Stats::bump(&self.stats.commits);
        self.flush().map_err(quilt_chunks::ChunkError::from)?;

        let mut inner = self.lock();
        if inner.root != expected {
            // Already stale locally; refresh and report the loss.
            Stats::bump(&self.stats.cas_failures);
            let fetched = self
                .manifest
                .fetch()
                .map_err(quilt_chunks::ChunkError::from)?;
            self.rebase_locked(&mut inner, fetched)
                .map_err(quilt_chunks::ChunkError::from)?;
            return Ok(false);
        }

        if inner.novel.len() + inner.upstream.len() > self.config.conjoin_threshold {
            let sources: Vec<ChunkSource> = inner
                .novel
                .iter()
                .chain(inner.upstream.iter())
                .cloned()
                .collect();
            let merged = self
                .persister
                .conjoin_all(&sources, &self.stats)
                .map_err(quilt_chunks::ChunkError::from)?;
            debug!(
                merged = sources.len(),
                table = %merged.name.short(),
                "conjoined table set"
            );
            inner.novel = vec![merged];
            inner.upstream.clear();
        }

        let record = ManifestRecord::new(STORE_VERSION, new, inner.table_specs());
        let expected_record = inner.manifest.clone();
        let stored = self
            .manifest
            .update(expected_record.as_ref(), &record)
            .map_err(quilt_chunks::ChunkError::from)?;

        if stored.cas_matches(&record) {
            inner.root = new;
            inner.manifest = Some(record);
            let mut all = std::mem::take(&mut inner.novel);
            all.append(&mut inner.upstream);
            inner.upstream = all;
            Ok(true)
        } else {
            Stats::bump(&self.stats.cas_failures);
            self.rebase_locked(&mut inner, Some(stored))
                .map_err(quilt_chunks::ChunkError::from)?;
            Ok(false)
        }
    }

    fn rebase(&self) -> ChunkResult<()> {
        let fetched = self
            .manifest
            .fetch()
            .map_err(quilt_chunks::ChunkError::from)?;
        let mut inner = self.lock();
        self.rebase_locked(&mut inner, fetched)
            .map_err(quilt_chunks::ChunkError::from)?;
        Ok(())
    }

    fn stats_summary(&self) -> String {
        let inner = self.lock();
        format!(
            "{}; tables: {} ({} novel), memtable: {} chunks / {} bytes",
            self.stats.summary(),
            inner.novel.len() + inner.upstream.len(),
            inner.novel.len(),
            inner.mt.count(),
            inner.mt.size(),
        )
    }
}

/// Convenience constructor: a file-backed store rooted at `dir`.
pub fn file_block_store(dir: &std::path::Path, config: StoreConfig) -> NbsResult<BlockStore> {
    let persister = Arc::new(crate::file::FilePersister::new(dir.join("tables"))?);
    let manifest = Arc::new(crate::manifest::FileManifestBackend::new(dir)?);
    BlockStore::new(persister, manifest, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{KvTable, MemoryKvTable, MemoryObjectStorage, ObjectStorage};
    use crate::kv::KvPersister;
    use crate::manifest::KvManifestBackend;
    use crate::object::{ObjectPersister, PartLimits};

    fn small_config() -> StoreConfig {
        StoreConfig {
            memtable_budget: 64,
            conjoin_threshold: 3,
        }
    }

    fn file_store(dir: &std::path::Path) -> BlockStore {
        file_block_store(dir, small_config()).unwrap()
    }

    fn cloud_store(
        storage: &Arc<MemoryObjectStorage>,
        kv: &Arc<MemoryKvTable>,
    ) -> BlockStore {
        let object = ObjectPersister::with_limits(
            Arc::clone(storage) as Arc<dyn ObjectStorage>,
            "tables/",
            PartLimits {
                min: 64,
                max: 4096,
                target: 256,
            },
        );
        let persister = Arc::new(
            KvPersister::new(Arc::clone(kv) as Arc<dyn KvTable>, object).with_limits(200, 8),
        );
        let manifest = Arc::new(KvManifestBackend::new(
            Arc::clone(kv) as Arc<dyn KvTable>,
            "db",
        ));
        BlockStore::new(persister, manifest, small_config()).unwrap()
    }

    fn put_str(store: &BlockStore, s: &str) -> Address {
        let chunk = Chunk::new(s.as_bytes().to_vec());
        let address = chunk.address();
        store.put(chunk).unwrap();
        address
    }

    // -------------------------------------------------------------------
    // Basic reads and writes
    // -------------------------------------------------------------------

    #[test]
    fn fresh_store_has_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        assert!(store.root().unwrap().is_empty());
    }

    #[test]
    fn put_then_get_before_any_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        let address = put_str(&store, "hello");
        assert_eq!(store.get(&address).unwrap().data(), b"hello");
        assert!(store.has(&address).unwrap());
    }

    #[test]
    fn puts_survive_memtable_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        // 64-byte budget: 20-byte payloads force flushes.
        let addresses: Vec<Address> = (0..20)
            .map(|i| put_str(&store, &format!("payload-number-{i:04}")))
            .collect();
        for (i, address) in addresses.iter().enumerate() {
            let chunk = store.get(address).unwrap();
            assert_eq!(chunk.data(), format!("payload-number-{i:04}").as_bytes());
        }
        assert!(store.table_count() >= 1);
    }

    #[test]
    fn get_many_delivers_across_memtable_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        let addresses: Vec<Address> = (0..12)
            .map(|i| put_str(&store, &format!("chunk-{i}-padding-to-force-flush")))
            .collect();

        let (tx, rx) = crossbeam_channel::unbounded();
        store.get_many(&addresses, &tx).unwrap();
        drop(tx);
        let got: std::collections::HashSet<Address> =
            rx.iter().map(|c| c.address()).collect();
        assert_eq!(got.len(), addresses.len());
    }

    #[test]
    fn has_many_is_parallel_and_order_preserving() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        let a = put_str(&store, "first");
        let missing = Address::of(b"never-stored");
        let b = put_str(&store, "second");
        assert_eq!(
            store.has_many(&[a, missing, b]).unwrap(),
            vec![true, false, true]
        );
    }

    // -------------------------------------------------------------------
    // Commit, durability, rebase
    // -------------------------------------------------------------------

    #[test]
    fn commit_makes_chunks_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let address;
        let root = Address::of(b"the-root");
        {
            let store = file_store(dir.path());
            address = put_str(&store, "durable");
            assert!(store.commit(root, Address::EMPTY).unwrap());
        }
        let reopened = file_store(dir.path());
        assert_eq!(reopened.root().unwrap(), root);
        assert_eq!(reopened.get(&address).unwrap().data(), b"durable");
    }

    #[test]
    fn commit_with_stale_expected_rebases_and_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let view1 = file_store(dir.path());
        let view2 = file_store(dir.path());

        let base = view1.root().unwrap();
        let x1 = Address::of(b"x1");
        let x2 = Address::of(b"x2");

        assert!(view1.commit(x1, base).unwrap());
        // view2 still holds the old root; its commit must lose.
        assert!(!view2.commit(x2, base).unwrap());
        // After the built-in rebase the winner's root is visible.
        assert_eq!(view2.root().unwrap(), x1);
        // And the retry from the current root succeeds.
        assert!(view2.commit(x2, x1).unwrap());
        assert_eq!(view2.root().unwrap(), x2);
        view1.rebase().unwrap();
        assert_eq!(view1.root().unwrap(), x2);
    }

    #[test]
    fn rebase_picks_up_tables_committed_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let writer = file_store(dir.path());
        let reader = file_store(dir.path());

        let address = put_str(&writer, "shared-data");
        assert!(writer.commit(Address::of(b"r"), Address::EMPTY).unwrap());

        // The reader view was opened before the commit.
        reader.rebase().unwrap();
        assert_eq!(reader.get(&address).unwrap().data(), b"shared-data");
    }

    #[test]
    fn losing_view_keeps_its_pending_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let view1 = file_store(dir.path());
        let view2 = file_store(dir.path());
        let base = view1.root().unwrap();

        let kept = put_str(&view2, "kept-on-loss");
        assert!(view1.commit(Address::of(b"w"), base).unwrap());
        assert!(!view2.commit(Address::of(b"l"), base).unwrap());

        // The loser's chunk is still readable locally and lands with the
        // retried commit.
        assert_eq!(view2.get(&kept).unwrap().data(), b"kept-on-loss");
        let current = view2.root().unwrap();
        assert!(view2.commit(Address::of(b"l2"), current).unwrap());

        let fresh = file_store(dir.path());
        assert_eq!(fresh.get(&kept).unwrap().data(), b"kept-on-loss");
    }

    // -------------------------------------------------------------------
    // Conjoin
    // -------------------------------------------------------------------

    #[test]
    fn commit_conjoins_past_the_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());

        // Drive many flushes with distinct chunks.
        let addresses: Vec<Address> = (0..30)
            .map(|i| put_str(&store, &format!("conjoin-fodder-{i:05}-aaaaaaaaaa")))
            .collect();
        assert!(store.table_count() > 3);

        let root = Address::of(b"conjoined-root");
        assert!(store.commit(root, Address::EMPTY).unwrap());
        // threshold 3: the commit collapsed the set.
        assert!(store.table_count() <= 2, "tables: {}", store.table_count());

        for address in &addresses {
            assert!(store.has(address).unwrap());
        }

        // A reopened view reads everything through the manifest.
        let fresh = file_store(dir.path());
        for address in &addresses {
            assert!(fresh.has(address).unwrap(), "lost {address} in conjoin");
        }
    }

    // -------------------------------------------------------------------
    // Cloud-backed store
    // -------------------------------------------------------------------

    #[test]
    fn cloud_store_roundtrips_and_commits() {
        let storage = Arc::new(MemoryObjectStorage::new());
        let kv = Arc::new(MemoryKvTable::new());
        let store = cloud_store(&storage, &kv);

        let addresses: Vec<Address> = (0..16)
            .map(|i| put_str(&store, &format!("cloud-chunk-{i:04}-xxxxxxxxxxxx")))
            .collect();
        let root = Address::of(b"cloud-root");
        assert!(store.commit(root, Address::EMPTY).unwrap());

        let reopened = cloud_store(&storage, &kv);
        assert_eq!(reopened.root().unwrap(), root);
        for address in &addresses {
            assert!(reopened.has(address).unwrap());
        }
    }

    #[test]
    fn cloud_views_serialize_through_manifest_cas() {
        let storage = Arc::new(MemoryObjectStorage::new());
        let kv = Arc::new(MemoryKvTable::new());
        let view1 = cloud_store(&storage, &kv);
        let view2 = cloud_store(&storage, &kv);

        let base = view1.root().unwrap();
        assert!(view1.commit(Address::of(b"a"), base).unwrap());
        assert!(!view2.commit(Address::of(b"b"), base).unwrap());
        assert_eq!(view2.root().unwrap(), Address::of(b"a"));
    }

    #[test]
    fn stats_summary_reflects_activity() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        put_str(&store, "counted");
        let summary = store.stats_summary();
        assert!(summary.contains("puts: 1"), "{summary}");
    }
}
