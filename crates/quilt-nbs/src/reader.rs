//! Random-access table reading.
//!
//! A [`TableReader`] pairs a parsed [`TableIndex`] with a byte source it
//! can read ranges out of: an in-memory image, a local file, or a ranged
//! object-store key. Batch reads share one linear pass over the index and
//! coalesce adjacent payload ranges into single physical reads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use quilt_chunks::{Chunk, ChunkSink};
use quilt_hash::Address;

use crate::error::{NbsError, NbsResult};
use crate::table::{parse_footer, TableIndex, FOOTER_SIZE};

/// Maximum byte gap between two chunk ranges that still lets them share
/// one physical read.
pub const DEFAULT_BLOCK_GAP: u64 = 4096;

/// Concurrent physical reads dispatched by one `get_many` batch.
const READ_PARALLELISM: usize = 4;

/// A byte source addressable by `(offset, length)`.
pub trait ReadAtSource: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> NbsResult<Vec<u8>>;
    fn len(&self) -> u64;
}

/// A fully in-memory table image.
pub struct InMemorySource(pub Vec<u8>);

impl ReadAtSource for InMemorySource {
    fn read_at(&self, offset: u64, len: usize) -> NbsResult<Vec<u8>> {
        let start = offset as usize;
        let end = start + len;
        if end > self.0.len() {
            return Err(NbsError::Corrupt(format!(
                "read of {len}@{offset} past end of {}-byte table",
                self.0.len()
            )));
        }
        Ok(self.0[start..end].to_vec())
    }

    fn len(&self) -> u64 {
        self.0.len() as u64
    }
}

/// A table stored in a local file.
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &std::path::Path) -> NbsResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ReadAtSource for FileSource {
    fn read_at(&self, offset: u64, len: usize) -> NbsResult<Vec<u8>> {
        let mut file = self.file.lock().expect("lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// One address in a batched lookup. Batches are sorted by prefix so every
/// table scans its index linearly; `found` latches as sources satisfy the
/// record.
#[derive(Clone, Debug)]
pub struct AddressRecord {
    pub address: Address,
    pub prefix: u64,
    pub found: bool,
}

impl AddressRecord {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            prefix: address.prefix(),
            found: false,
        }
    }
}

/// Sort records into address order (prefix, then suffix), as batch
/// operations require.
pub fn sort_records(records: &mut [AddressRecord]) {
    records.sort_by(|a, b| a.address.cmp(&b.address));
}

/// One physical read covering one or more chunk payloads.
struct PhysicalRead {
    offset: u64,
    len: usize,
    // (address, offset relative to the read, payload length)
    chunks: Vec<(Address, usize, usize)>,
}

/// An open table: parsed index plus a range-readable byte source.
pub struct TableReader {
    index: TableIndex,
    source: Arc<dyn ReadAtSource>,
    block_gap: u64,
}

impl TableReader {
    /// Open a reader over a complete in-memory table image.
    pub fn from_bytes(image: Vec<u8>) -> NbsResult<Self> {
        Self::from_source(Arc::new(InMemorySource(image)))
    }

    /// Open a reader over any byte source, parsing footer and index.
    pub fn from_source(source: Arc<dyn ReadAtSource>) -> NbsResult<Self> {
        let total_len = source.len();
        if total_len < FOOTER_SIZE as u64 {
            return Err(NbsError::Corrupt(format!(
                "table image is {total_len} bytes, smaller than the footer"
            )));
        }
        let footer = source.read_at(total_len - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        let (chunk_count, total_data) = parse_footer(&footer)?;
        let index = Self::parse_index(&*source, chunk_count, total_data)?;
        Ok(Self {
            index,
            source,
            block_gap: DEFAULT_BLOCK_GAP,
        })
    }

    /// Open a reader reusing an already-parsed index (index caches).
    pub fn with_index(index: TableIndex, source: Arc<dyn ReadAtSource>) -> Self {
        Self {
            index,
            source,
            block_gap: DEFAULT_BLOCK_GAP,
        }
    }

    /// Parse just the index of a table held in `source`.
    pub fn parse_index(
        source: &dyn ReadAtSource,
        chunk_count: u32,
        total_data: u64,
    ) -> NbsResult<TableIndex> {
        let total_len = source.len();
        let index_len = chunk_count as usize * crate::table::INDEX_ENTRY_SIZE;
        let index_start = total_len
            .checked_sub((FOOTER_SIZE + index_len) as u64)
            .ok_or_else(|| NbsError::Corrupt("index extends past start of table".into()))?;
        let block = source.read_at(index_start, index_len)?;
        TableIndex::parse(&block, chunk_count, total_data)
    }

    pub fn chunk_count(&self) -> u32 {
        self.index.chunk_count()
    }

    pub fn total_data(&self) -> u64 {
        self.index.total_data()
    }

    pub fn index(&self) -> &TableIndex {
        &self.index
    }

    pub(crate) fn source(&self) -> &Arc<dyn ReadAtSource> {
        &self.source
    }

    /// Whether the table holds a chunk with this address.
    pub fn has(&self, address: &Address) -> bool {
        self.index.lookup(address).is_some()
    }

    /// Read one chunk payload, or `None` if absent.
    pub fn get(&self, address: &Address) -> NbsResult<Option<Vec<u8>>> {
        match self.index.lookup(address) {
            Some((offset, len)) => Ok(Some(self.source.read_at(offset, len as usize)?)),
            None => Ok(None),
        }
    }

    /// Satisfy whichever sorted `records` this table holds, setting their
    /// `found` flags. Returns `true` if any record is still unsatisfied.
    pub fn has_many(&self, records: &mut [AddressRecord]) -> bool {
        let mut remaining = false;
        let mut i = 0usize; // sorted index position
        let n = self.index.chunk_count() as usize;
        for record in records.iter_mut() {
            if record.found {
                continue;
            }
            while i < n && self.index.address_at(i) < record.address {
                i += 1;
            }
            if i < n && self.index.address_at(i) == record.address {
                record.found = true;
            } else {
                remaining = true;
            }
        }
        remaining
    }

    /// Read every chunk this table holds from the sorted `records`,
    /// delivering them to `sink` (order unspecified). Adjacent payload
    /// ranges within [`DEFAULT_BLOCK_GAP`] share a single physical read,
    /// and up to a small fixed number of physical reads run concurrently.
    /// Returns `true` if any record remains unsatisfied.
    pub fn get_many(&self, records: &mut [AddressRecord], sink: &ChunkSink) -> NbsResult<bool> {
        let (found, remaining) = self.locate(records);
        let plan = self.plan_reads(found, self.block_gap);
        if plan.is_empty() {
            return Ok(remaining);
        }

        if plan.len() == 1 {
            self.execute_read(&plan[0], sink)?;
            return Ok(remaining);
        }

        let groups: Vec<&[PhysicalRead]> = plan
            .chunks(plan.len().div_ceil(READ_PARALLELISM))
            .collect();
        let mut failure = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = groups
                .into_iter()
                .map(|group| {
                    scope.spawn(move || {
                        for read in group {
                            self.execute_read(read, sink)?;
                        }
                        Ok::<_, NbsError>(())
                    })
                })
                .collect();
            for handle in handles {
                if let Err(e) = handle.join().expect("reader thread panicked") {
                    failure = Some(e);
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(remaining),
        }
    }

    /// Number of physical reads needed to satisfy the sorted `records`
    /// with ranges coalesced at `block_size` gaps, plus whether any
    /// record is absent from this table. The fragmentation diagnostic.
    pub fn calc_reads(&self, records: &[AddressRecord], block_size: u64) -> (usize, bool) {
        let mut scratch: Vec<AddressRecord> = records.to_vec();
        let (found, remaining) = self.locate(&mut scratch);
        (self.plan_reads(found, block_size).len(), remaining)
    }

    /// Stream every chunk in index (address-sorted) order.
    pub fn extract(&self, sink: &ChunkSink) -> NbsResult<()> {
        let data = self.source.read_at(0, self.index.total_data() as usize)?;
        for i in 0..self.index.chunk_count() as usize {
            let (offset, len) = self.index.location_at(i);
            let payload = data[offset as usize..offset as usize + len as usize].to_vec();
            let _ = sink.send(Chunk::from_parts(self.index.address_at(i), payload));
        }
        Ok(())
    }

    // (address, offset, length) for each unsatisfied record present here,
    // marking records found; second return is whether any record remains.
    fn locate(&self, records: &mut [AddressRecord]) -> (Vec<(Address, u64, u32)>, bool) {
        let mut found = Vec::new();
        let mut remaining = false;
        let mut i = 0usize;
        let n = self.index.chunk_count() as usize;
        for record in records.iter_mut() {
            if record.found {
                continue;
            }
            while i < n && self.index.address_at(i) < record.address {
                i += 1;
            }
            if i < n && self.index.address_at(i) == record.address {
                record.found = true;
                let (offset, len) = self.index.location_at(i);
                found.push((record.address, offset, len));
            } else {
                remaining = true;
            }
        }
        (found, remaining)
    }

    fn plan_reads(&self, mut found: Vec<(Address, u64, u32)>, gap: u64) -> Vec<PhysicalRead> {
        found.sort_by_key(|&(_, offset, _)| offset);
        let mut plan: Vec<PhysicalRead> = Vec::new();
        for (address, offset, len) in found {
            let end = offset + len as u64;
            if let Some(last) = plan.last_mut() {
                let last_end = last.offset + last.len as u64;
                if offset <= last_end + gap {
                    let rel = (offset - last.offset) as usize;
                    last.chunks.push((address, rel, len as usize));
                    if end > last_end {
                        last.len = (end - last.offset) as usize;
                    }
                    continue;
                }
            }
            plan.push(PhysicalRead {
                offset,
                len: len as usize,
                chunks: vec![(address, 0, len as usize)],
            });
        }
        plan
    }

    fn execute_read(&self, read: &PhysicalRead, sink: &ChunkSink) -> NbsResult<()> {
        let buf = self.source.read_at(read.offset, read.len)?;
        for &(address, rel, len) in &read.chunks {
            let _ = sink.send(Chunk::from_parts(address, buf[rel..rel + len].to_vec()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::TableWriter;
    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};
    use std::collections::HashMap;

    fn build_table(chunks: &[Vec<u8>]) -> TableReader {
        let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        let mut writer = TableWriter::new(chunks.len() as u64, total);
        for c in chunks {
            writer.add_chunk(Address::of(c), c);
        }
        let (image, _) = writer.finish();
        TableReader::from_bytes(image).unwrap()
    }

    fn random_chunks(count: usize, seed: u64) -> Vec<Vec<u8>> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let len = 16 + (rng.next_u32() % 128) as usize;
                let mut data = vec![0u8; len];
                rng.fill_bytes(&mut data);
                data
            })
            .collect()
    }

    fn records_for(chunks: &[Vec<u8>]) -> Vec<AddressRecord> {
        let mut records: Vec<AddressRecord> = chunks
            .iter()
            .map(|c| AddressRecord::new(Address::of(c)))
            .collect();
        sort_records(&mut records);
        records
    }

    // -------------------------------------------------------------------
    // Point lookups
    // -------------------------------------------------------------------

    #[test]
    fn has_and_get() {
        let chunks = random_chunks(32, 1);
        let reader = build_table(&chunks);
        for c in &chunks {
            assert!(reader.has(&Address::of(c)));
            assert_eq!(reader.get(&Address::of(c)).unwrap().unwrap(), *c);
        }
        assert!(!reader.has(&Address::of(b"absent")));
    }

    // -------------------------------------------------------------------
    // Batch operations
    // -------------------------------------------------------------------

    #[test]
    fn has_many_marks_only_present_records() {
        let chunks = random_chunks(16, 2);
        let reader = build_table(&chunks[..8]);
        let mut records = records_for(&chunks);

        let remaining = reader.has_many(&mut records);
        assert!(remaining);
        let present: std::collections::HashSet<Address> =
            chunks[..8].iter().map(|c| Address::of(c)).collect();
        for r in &records {
            assert_eq!(r.found, present.contains(&r.address), "record {:?}", r.address);
        }
    }

    #[test]
    fn has_many_with_everything_present_reports_no_remaining() {
        let chunks = random_chunks(10, 3);
        let reader = build_table(&chunks);
        let mut records = records_for(&chunks);
        assert!(!reader.has_many(&mut records));
        assert!(records.iter().all(|r| r.found));
    }

    #[test]
    fn get_many_delivers_every_present_chunk() {
        let chunks = random_chunks(64, 4);
        let reader = build_table(&chunks);
        let mut records = records_for(&chunks);

        let (tx, rx) = crossbeam_channel::unbounded();
        let remaining = reader.get_many(&mut records, &tx).unwrap();
        drop(tx);
        assert!(!remaining);

        let by_addr: HashMap<Address, Vec<u8>> =
            rx.iter().map(|c| (c.address(), c.into_data())).collect();
        assert_eq!(by_addr.len(), chunks.len());
        for c in &chunks {
            assert_eq!(by_addr[&Address::of(c)], *c);
        }
    }

    #[test]
    fn get_many_skips_absent_and_reports_remaining() {
        let chunks = random_chunks(8, 5);
        let reader = build_table(&chunks[..4]);
        let mut records = records_for(&chunks);

        let (tx, rx) = crossbeam_channel::unbounded();
        let remaining = reader.get_many(&mut records, &tx).unwrap();
        drop(tx);
        assert!(remaining);
        assert_eq!(rx.iter().count(), 4);
    }

    #[test]
    fn extract_streams_chunks_in_address_order() {
        let chunks = random_chunks(20, 6);
        let reader = build_table(&chunks);
        let (tx, rx) = crossbeam_channel::unbounded();
        reader.extract(&tx).unwrap();
        drop(tx);

        let extracted: Vec<Chunk> = rx.iter().collect();
        assert_eq!(extracted.len(), chunks.len());
        let mut addrs: Vec<Address> = extracted.iter().map(|c| c.address()).collect();
        let mut sorted = addrs.clone();
        sorted.sort();
        assert_eq!(addrs, sorted);
        // Payloads intact.
        for c in &extracted {
            assert!(c.verify());
        }
        addrs.dedup();
        assert_eq!(addrs.len(), chunks.len());
    }

    // -------------------------------------------------------------------
    // Read coalescing
    // -------------------------------------------------------------------

    #[test]
    fn calc_reads_coalesces_adjacent_ranges() {
        let chunks = random_chunks(32, 7);
        let reader = build_table(&chunks);
        let records = records_for(&chunks);

        // Payloads are contiguous, so a huge block size means one read.
        let (reads, remaining) = reader.calc_reads(&records, u64::MAX / 2);
        assert_eq!(reads, 1);
        assert!(!remaining);

        // A zero gap still coalesces strictly adjacent chunks, which these
        // are, so the count stays 1.
        let (reads, _) = reader.calc_reads(&records, 0);
        assert_eq!(reads, 1);
    }

    #[test]
    fn calc_reads_counts_fragmented_requests() {
        let chunks = random_chunks(9, 8);
        let reader = build_table(&chunks);
        // Request every other chunk: with zero gap tolerance the holes
        // force one read per requested chunk.
        let sparse: Vec<Vec<u8>> = chunks.iter().step_by(2).cloned().collect();
        let records = records_for(&sparse);
        let (reads, remaining) = reader.calc_reads(&records, 0);
        assert_eq!(reads, sparse.len());
        assert!(!remaining);
    }

    #[test]
    fn calc_reads_flags_absent_records() {
        let chunks = random_chunks(4, 9);
        let reader = build_table(&chunks[..2]);
        let records = records_for(&chunks);
        let (_, remaining) = reader.calc_reads(&records, 0);
        assert!(remaining);
    }

    // -------------------------------------------------------------------
    // Large tables
    // -------------------------------------------------------------------

    #[test]
    fn thousand_chunk_table() {
        let chunks = random_chunks(1000, 10);
        let reader = build_table(&chunks);
        assert_eq!(reader.chunk_count(), 1000);

        let mut records = records_for(&chunks);
        let (tx, rx) = crossbeam_channel::unbounded();
        let remaining = reader.get_many(&mut records, &tx).unwrap();
        drop(tx);
        assert!(!remaining);
        assert_eq!(rx.iter().count(), 1000);
    }
}
