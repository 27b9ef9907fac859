//! Table compaction.
//!
//! Conjoining N source tables produces one table whose data region is the
//! concatenation of the sources' data regions and whose index is the
//! merged, re-sorted index. Every member chunk is preserved; only table
//! count shrinks. The generic path here materializes the merged image in
//! memory; the object-store persister instead plans server-side part
//! copies and only re-uploads small tails (see [`crate::object`]).

use quilt_hash::Address;

use crate::error::NbsResult;
use crate::persist::ChunkSource;
use crate::writer::TableWriter;

/// Merge `sources` into a single in-memory table image.
///
/// Returns `(image, name, chunk_count)`.
pub fn conjoin_image(sources: &[ChunkSource]) -> NbsResult<(Vec<u8>, Address, u32)> {
    let count: u64 = sources.iter().map(|s| s.chunk_count as u64).sum();
    let total: u64 = sources.iter().map(|s| s.reader.total_data()).sum();
    let mut writer = TableWriter::new(count, total);

    for source in sources {
        let data = source
            .reader
            .source()
            .read_at(0, source.reader.total_data() as usize)?;
        for (address, len) in source.reader.index().entries_by_ordinal() {
            let offset = writer_offset(&data, source, address, len);
            writer.add_chunk(address, &data[offset..offset + len as usize]);
        }
    }

    let chunk_count = writer.chunk_count();
    let (image, name) = writer.finish();
    Ok((image, name, chunk_count))
}

// Payloads sit in ordinal order, so each chunk's offset is just the
// running position; recompute it from the index to stay robust against
// any future layout change.
fn writer_offset(_data: &[u8], source: &ChunkSource, address: Address, _len: u32) -> usize {
    source
        .reader
        .index()
        .lookup(&address)
        .map(|(offset, _)| offset as usize)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemTable;
    use crate::reader::TableReader;
    use std::sync::Arc;

    fn source_of(payloads: &[&[u8]]) -> ChunkSource {
        let mut mt = MemTable::new(1 << 20);
        for p in payloads {
            mt.add(&quilt_chunks::Chunk::new(p.to_vec()));
        }
        let (image, name) = mt.table_image();
        ChunkSource {
            name,
            chunk_count: payloads.len() as u32,
            reader: Arc::new(TableReader::from_bytes(image).unwrap()),
            object_key: None,
        }
    }

    #[test]
    fn conjoined_table_holds_every_member_chunk() {
        let a = source_of(&[b"one", b"two"]);
        let b = source_of(&[b"three"]);
        let c = source_of(&[b"four", b"five", b"six"]);

        let (image, _, count) = conjoin_image(&[a, b, c]).unwrap();
        assert_eq!(count, 6);

        let reader = TableReader::from_bytes(image).unwrap();
        for p in [b"one".as_slice(), b"two", b"three", b"four", b"five", b"six"] {
            assert_eq!(
                reader.get(&Address::of(p)).unwrap().as_deref(),
                Some(p),
                "missing {:?}",
                String::from_utf8_lossy(p)
            );
        }
    }

    #[test]
    fn conjoin_name_matches_direct_build() {
        // A table holding the same chunks has the same name no matter how
        // it was produced.
        let a = source_of(&[b"x"]);
        let b = source_of(&[b"y"]);
        let (_, conjoined_name, _) = conjoin_image(&[a, b]).unwrap();

        let direct = source_of(&[b"x", b"y"]);
        assert_eq!(conjoined_name, direct.name);
    }

    #[test]
    fn conjoin_of_single_source_is_equivalent() {
        let a = source_of(&[b"solo", b"duo"]);
        let (image, name, count) = conjoin_image(std::slice::from_ref(&a)).unwrap();
        assert_eq!(name, a.name);
        assert_eq!(count, 2);
        let reader = TableReader::from_bytes(image).unwrap();
        assert!(reader.has(&Address::of(b"solo")));
    }
}
