use std::sync::Arc;

use quilt_hash::ChunkConfig;

use crate::chunker::{LeafItem, TreeBuilder};
use crate::cursor::collect_items;
use crate::error::ValueResult;
use crate::kind::Kind;
use crate::sequence::Sequence;
use crate::store::{ValueReader, ValueStore};

/// An immutable byte sequence, chunked by content.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    seq: Arc<Sequence>,
}

impl Blob {
    pub fn empty() -> Self {
        Self {
            seq: Arc::new(Sequence::empty(Kind::Blob)),
        }
    }

    pub(crate) fn from_sequence(seq: Arc<Sequence>) -> Self {
        Self { seq }
    }

    /// Ingest a byte string, writing overflow chunks into `store`.
    pub fn from_bytes(store: &dyn ValueStore, data: &[u8]) -> ValueResult<Self> {
        Self::from_bytes_with_config(store, data, ChunkConfig::DEFAULT)
    }

    /// Ingest with explicit chunking parameters.
    pub fn from_bytes_with_config(
        store: &dyn ValueStore,
        data: &[u8],
        config: ChunkConfig,
    ) -> ValueResult<Self> {
        let mut builder = TreeBuilder::new(store, Kind::Blob, config);
        for &b in data {
            builder.push(LeafItem::Byte(b))?;
        }
        Ok(Self {
            seq: builder.finish()?,
        })
    }

    pub fn sequence(&self) -> &Sequence {
        &self.seq
    }

    /// Total byte length.
    pub fn len(&self) -> u64 {
        self.seq.num_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the full contents back out of `store`.
    pub fn bytes(&self, store: &dyn ValueReader) -> ValueResult<Vec<u8>> {
        let items = collect_items(store, Arc::clone(&self.seq))?;
        Ok(items
            .into_iter()
            .map(|i| match i {
                LeafItem::Byte(b) => b,
                _ => unreachable!("blob leaves hold bytes"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemValueStore;
    use crate::value::Value;
    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};

    #[test]
    fn small_blob_roundtrip() {
        let store = MemValueStore::new();
        let blob = Blob::from_bytes(&store, b"hello").unwrap();
        assert_eq!(blob.len(), 5);
        assert_eq!(blob.bytes(&store).unwrap(), b"hello");
    }

    #[test]
    fn empty_blob() {
        let store = MemValueStore::new();
        let blob = Blob::from_bytes(&store, b"").unwrap();
        assert!(blob.is_empty());
        assert_eq!(blob, Blob::empty());
        assert_eq!(blob.bytes(&store).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn large_blob_roundtrip() {
        let store = MemValueStore::new();
        let mut rng = SmallRng::seed_from_u64(31);
        let mut data = vec![0u8; 100 * 1024];
        rng.fill_bytes(&mut data);

        let blob = Blob::from_bytes(&store, &data).unwrap();
        assert_eq!(blob.len(), data.len() as u64);
        assert!(!blob.sequence().is_leaf());
        assert_eq!(blob.bytes(&store).unwrap(), data);
    }

    #[test]
    fn equal_content_means_equal_address() {
        let s1 = MemValueStore::new();
        let s2 = MemValueStore::new();
        let mut rng = SmallRng::seed_from_u64(37);
        let mut data = vec![0u8; 40 * 1024];
        rng.fill_bytes(&mut data);

        let b1 = Blob::from_bytes(&s1, &data).unwrap();
        let b2 = Blob::from_bytes(&s2, &data).unwrap();
        assert_eq!(Value::Blob(b1).address(), Value::Blob(b2).address());
    }

    #[test]
    fn shared_prefix_shares_chunks() {
        // Appending to a large blob leaves the prefix chunks intact.
        let mut rng = SmallRng::seed_from_u64(41);
        let mut data = vec![0u8; 64 * 1024];
        rng.fill_bytes(&mut data);

        let s1 = MemValueStore::new();
        Blob::from_bytes(&s1, &data).unwrap();
        let before = s1.chunk_count();

        let mut extended = data.clone();
        extended.extend_from_slice(b"tail");
        Blob::from_bytes(&s1, &extended).unwrap();
        let added = s1.chunk_count() - before;

        // Only the trailing chunk and the meta spine should be new.
        assert!(added < 6, "expected structural sharing, {added} new chunks");
    }
}
