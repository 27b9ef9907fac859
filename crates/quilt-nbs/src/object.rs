use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use quilt_hash::Address;
use tracing::debug;

use crate::cloud::ObjectStorage;
use crate::conjoin::conjoin_image;
use crate::error::{with_retry, NbsError, NbsResult};
use crate::memtable::MemTable;
use crate::persist::{all_chunks_exist, ChunkSource, TablePersister, TableSet};
use crate::reader::{ReadAtSource, TableReader};
use crate::stats::Stats;
use crate::table::{build_index_and_footer, TableIndex};

const INDEX_CACHE_SIZE: usize = 64;
const DEFAULT_RETRIES: u32 = 3;

/// Multipart sizing bounds, in bytes.
#[derive(Clone, Copy, Debug)]
pub struct PartLimits {
    /// Minimum part size the object store accepts for non-final parts.
    pub min: u64,
    /// Maximum part size.
    pub max: u64,
    /// Preferred part size; also the single-PUT threshold.
    pub target: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min: 5 * 1024 * 1024,
            max: 64 * 1024 * 1024,
            target: 8 * 1024 * 1024,
        }
    }
}

/// A table held under an object-store key, read by byte range.
struct ObjectSource {
    storage: Arc<dyn ObjectStorage>,
    key: String,
    len: u64,
}

impl ReadAtSource for ObjectSource {
    fn read_at(&self, offset: u64, len: usize) -> NbsResult<Vec<u8>> {
        self.storage.read_range(&self.key, offset, len)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Persists tables to an S3-class object store.
///
/// Small tables are written with a single PUT; larger tables stream
/// through a multipart upload with parts sized inside [`PartLimits`].
/// Uploads that fail persistently are aborted so no parts are stranded.
/// Conjoin avoids re-uploading bulk data by planning server-side part
/// copies over the source tables' data regions.
pub struct ObjectPersister {
    storage: Arc<dyn ObjectStorage>,
    prefix: String,
    limits: PartLimits,
    retries: u32,
    index_cache: Mutex<LruCache<Address, TableIndex>>,
}

impl ObjectPersister {
    pub fn new(storage: Arc<dyn ObjectStorage>, prefix: impl Into<String>) -> Self {
        Self::with_limits(storage, prefix, PartLimits::default())
    }

    pub fn with_limits(
        storage: Arc<dyn ObjectStorage>,
        prefix: impl Into<String>,
        limits: PartLimits,
    ) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            limits,
            retries: DEFAULT_RETRIES,
            index_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(INDEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn key(&self, name: Address) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Upload a complete table image under its name.
    pub(crate) fn persist_image(
        &self,
        image: Vec<u8>,
        name: Address,
        chunk_count: u32,
    ) -> NbsResult<ChunkSource> {
        let key = self.key(name);
        if (image.len() as u64) <= self.limits.target {
            with_retry(self.retries, || self.storage.put(&key, image.clone()))?;
        } else {
            self.multipart_put(&key, &image)?;
        }
        debug!(table = %name.short(), bytes = image.len(), "persisted table object");
        // Serve reads from the local copy we already hold.
        let reader = Arc::new(TableReader::from_bytes(image)?);
        Ok(ChunkSource {
            name,
            chunk_count,
            reader,
            object_key: Some(key),
        })
    }

    fn multipart_put(&self, key: &str, image: &[u8]) -> NbsResult<()> {
        let upload = self.storage.create_multipart(key)?;
        let result = self.upload_parts(&upload, image);
        if let Err(e) = result {
            // No stranded parts on persistent failure.
            let _ = self.storage.abort_multipart(&upload);
            return Err(e);
        }
        self.storage.complete_multipart(&upload)
    }

    fn upload_parts(&self, upload: &str, image: &[u8]) -> NbsResult<()> {
        let len = image.len() as u64;
        let part_count = len.div_ceil(self.limits.target).max(1);
        let part_size = len
            .div_ceil(part_count)
            .clamp(self.limits.min.min(len), self.limits.max);

        let mut part_no = 1u32;
        let mut offset = 0u64;
        while offset < len {
            let end = (offset + part_size).min(len);
            let part = image[offset as usize..end as usize].to_vec();
            with_retry(self.retries, || {
                self.storage.upload_part(upload, part_no, part.clone())
            })?;
            part_no += 1;
            offset = end;
        }
        Ok(())
    }

    fn open_source(&self, name: Address, chunk_count: u32) -> NbsResult<ChunkSource> {
        let key = self.key(name);
        let len = self.storage.size(&key)?;
        let source = Arc::new(ObjectSource {
            storage: Arc::clone(&self.storage),
            key: key.clone(),
            len,
        });

        let cached = self.index_cache.lock().expect("lock poisoned").get(&name).cloned();
        let reader = match cached {
            Some(index) => TableReader::with_index(index, source),
            None => {
                let reader = TableReader::from_source(source)?;
                self.index_cache
                    .lock()
                    .expect("lock poisoned")
                    .put(name, reader.index().clone());
                reader
            }
        };
        if reader.chunk_count() != chunk_count {
            return Err(NbsError::Corrupt(format!(
                "table {name} has {} chunks, manifest says {chunk_count}",
                reader.chunk_count()
            )));
        }
        Ok(ChunkSource {
            name,
            chunk_count,
            reader: Arc::new(reader),
            object_key: Some(key),
        })
    }
}

impl TablePersister for ObjectPersister {
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
        Ok(Some(self.persist_image(image, name, mt.count())?))
    }

    fn open(&self, name: Address, chunk_count: u32) -> NbsResult<ChunkSource> {
        self.open_source(name, chunk_count)
    }

    /// Conjoin with plan division: source tables whose data region fits
    /// in `[min, max]` become server-side copy parts; over-max sources
    /// are split into several copy parts along chunk boundaries; under-min
    /// sources (and sources with no object key) are re-read into a small
    /// manual tail that also carries the merged index and footer.
    fn conjoin_all(&self, sources: &[ChunkSource], stats: &Stats) -> NbsResult<ChunkSource> {
        let (copyable, manual): (Vec<&ChunkSource>, Vec<&ChunkSource>) =
            sources.iter().partition(|s| {
                s.object_key.is_some() && s.reader.total_data() >= self.limits.min
            });

        if copyable.is_empty() {
            // Everything is small: assemble in memory and PUT.
            let (image, name, chunk_count) = conjoin_image(sources)?;
            Stats::bump(&stats.conjoins);
            return self.persist_image(image, name, chunk_count);
        }

        // Merged index over the new layout: copyable data regions first,
        // then the manual region, so index offsets match the upload plan.
        let mut entries: Vec<(Address, u32)> = Vec::new();
        for source in copyable.iter().chain(manual.iter()) {
            entries.extend(source.reader.index().entries_by_ordinal());
        }
        let (tail, name) = build_index_and_footer(&entries);
        let chunk_count = entries.len() as u32;
        let key = self.key(name);

        let upload = self.storage.create_multipart(&key)?;
        let plan = (|| -> NbsResult<()> {
            let mut part_no = 1u32;
            for source in &copyable {
                let src_key = source.object_key.as_deref().unwrap_or_default();
                for (offset, len) in split_copy_ranges(&*source.reader, self.limits.max) {
                    with_retry(self.retries, || {
                        self.storage
                            .upload_part_copy(&upload, part_no, src_key, offset, len)
                    })?;
                    part_no += 1;
                }
            }

            // Manual tail: small sources' data plus the index and footer.
            let mut manual_tail = Vec::with_capacity(tail.len());
            for source in &manual {
                let data = source
                    .reader
                    .source()
                    .read_at(0, source.reader.total_data() as usize)?;
                manual_tail.extend_from_slice(&data);
            }
            manual_tail.extend_from_slice(&tail);
            for piece in manual_tail.chunks(self.limits.max.max(1) as usize) {
                let piece = piece.to_vec();
                with_retry(self.retries, || {
                    self.storage.upload_part(&upload, part_no, piece.clone())
                })?;
                part_no += 1;
            }
            Ok(())
        })();

        if let Err(e) = plan {
            let _ = self.storage.abort_multipart(&upload);
            return Err(e);
        }
        self.storage.complete_multipart(&upload)?;
        Stats::bump(&stats.conjoins);
        debug!(
            table = %name.short(),
            merged = sources.len(),
            copied = copyable.len(),
            rewritten = manual.len(),
            "conjoined table objects"
        );
        self.open_source(name, chunk_count)
    }
}

/// Split a source's data region into copy ranges of at most `max` bytes,
/// cutting only at chunk boundaries. A single chunk larger than `max`
/// becomes its own (oversized) range.
fn split_copy_ranges(reader: &TableReader, max: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut start = 0u64;
    let mut len = 0u64;
    for (_, chunk_len) in reader.index().entries_by_ordinal() {
        let chunk_len = chunk_len as u64;
        if len > 0 && len + chunk_len > max {
            ranges.push((start, len));
            start += len;
            len = 0;
        }
        len += chunk_len;
    }
    if len > 0 {
        ranges.push((start, len));
    }
    ranges
}
