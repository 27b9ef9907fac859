use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use quilt_hash::Address;
use tracing::debug;

use crate::conjoin::conjoin_image;
use crate::error::{NbsError, NbsResult};
use crate::memtable::MemTable;
use crate::persist::{all_chunks_exist, ChunkSource, TablePersister, TableSet};
use crate::reader::{FileSource, TableReader};
use crate::stats::Stats;

const READER_CACHE_SIZE: usize = 32;

/// Persists tables as files in a directory, one file per table, named by
/// the base-32 spelling of the table name. Open readers are kept in a
/// size-bounded LRU so reopening a recently used table is free.
pub struct FilePersister {
    dir: PathBuf,
    cache: Mutex<LruCache<Address, Arc<TableReader>>>,
}

impl FilePersister {
    pub fn new(dir: impl Into<PathBuf>) -> NbsResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(READER_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    fn table_path(&self, name: Address) -> PathBuf {
        self.dir.join(name.to_string())
    }

    fn write_table(&self, image: &[u8], name: Address) -> NbsResult<()> {
        let path = self.table_path(name);
        if path.exists() {
            // Content-addressed: an existing file already has these bytes.
            return Ok(());
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, image)?;
        tmp.persist(&path).map_err(|e| NbsError::Io(e.error))?;
        Ok(())
    }

    fn open_reader(&self, name: Address) -> NbsResult<Arc<TableReader>> {
        if let Some(reader) = self.cache.lock().expect("lock poisoned").get(&name) {
            return Ok(Arc::clone(reader));
        }
        let source = FileSource::open(&self.table_path(name))?;
        let reader = Arc::new(TableReader::from_source(Arc::new(source))?);
        self.cache
            .lock()
            .expect("lock poisoned")
            .put(name, Arc::clone(&reader));
        Ok(reader)
    }
}

impl TablePersister for FilePersister {
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
        self.write_table(&image, name)?;
        debug!(table = %name.short(), chunks = mt.count(), "persisted table file");
        let reader = self.open_reader(name)?;
        Ok(Some(ChunkSource {
            name,
            chunk_count: mt.count(),
            reader,
            object_key: None,
        }))
    }

    fn open(&self, name: Address, chunk_count: u32) -> NbsResult<ChunkSource> {
        let reader = self.open_reader(name)?;
        if reader.chunk_count() != chunk_count {
            return Err(NbsError::Corrupt(format!(
                "table {name} has {} chunks, manifest says {chunk_count}",
                reader.chunk_count()
            )));
        }
        Ok(ChunkSource {
            name,
            chunk_count,
            reader,
            object_key: None,
        })
    }

    fn conjoin_all(&self, sources: &[ChunkSource], stats: &Stats) -> NbsResult<ChunkSource> {
        let (image, name, chunk_count) = conjoin_image(sources)?;
        self.write_table(&image, name)?;
        Stats::bump(&stats.conjoins);
        debug!(
            table = %name.short(),
            merged = sources.len(),
            chunks = chunk_count,
            "conjoined table files"
        );
        let reader = self.open_reader(name)?;
        Ok(ChunkSource {
            name,
            chunk_count,
            reader,
            object_key: None,
        })
    }
}
