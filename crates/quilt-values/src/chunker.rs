//! Building chunked collections.
//!
//! [`TreeBuilder`] streams logical items, feeding each item's canonical
//! bytes through a rolling hasher. When the hasher signals a boundary the
//! buffered items become a leaf chunk, written to the store, and a
//! [`MetaTuple`] for it is appended to the next level up — which chunks
//! the same way over the ordering-key bytes of its tuples. Finishing
//! unwinds the levels into a single root, collapsing single-entry meta
//! nodes so that equal item sequences always produce the same tree no
//! matter how they were fed in.

use std::sync::Arc;

use quilt_hash::{ChunkConfig, RollingHasher};

use crate::codec;
use crate::error::ValueResult;
use crate::kind::Kind;
use crate::sequence::{MapEntry, MetaTuple, Sequence, SequenceData};
use crate::store::ValueStore;
use crate::value::Value;

/// One logical item fed into (or read out of) a sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum LeafItem {
    /// A blob byte.
    Byte(u8),
    /// A list or set member.
    Value(Value),
    /// A map entry.
    Entry(MapEntry),
}

enum Items {
    Bytes(Vec<u8>),
    Values(Vec<Value>),
    Entries(Vec<MapEntry>),
    Metas(Vec<MetaTuple>),
}

impl Items {
    fn new_leaf(kind: Kind) -> Self {
        match kind {
            Kind::Blob => Items::Bytes(Vec::new()),
            Kind::Map => Items::Entries(Vec::new()),
            _ => Items::Values(Vec::new()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Items::Bytes(v) => v.is_empty(),
            Items::Values(v) => v.is_empty(),
            Items::Entries(v) => v.is_empty(),
            Items::Metas(v) => v.is_empty(),
        }
    }

    fn into_data(self) -> SequenceData {
        match self {
            Items::Bytes(v) => SequenceData::Bytes(v),
            Items::Values(v) => SequenceData::Values(v),
            Items::Entries(v) => SequenceData::Entries(v),
            Items::Metas(v) => SequenceData::Meta(v),
        }
    }
}

struct Level {
    items: Items,
    hasher: RollingHasher,
}

/// Streams items into a chunked sequence tree.
pub struct TreeBuilder<'a> {
    store: &'a dyn ValueStore,
    kind: Kind,
    config: ChunkConfig,
    levels: Vec<Level>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a dyn ValueStore, kind: Kind, config: ChunkConfig) -> Self {
        Self {
            store,
            kind,
            config,
            levels: vec![Level {
                items: Items::new_leaf(kind),
                hasher: RollingHasher::new(config),
            }],
        }
    }

    /// Append one leaf item. Items must arrive in final order (sorted by
    /// key for maps and sets).
    pub fn push(&mut self, item: LeafItem) -> ValueResult<()> {
        let level = &mut self.levels[0];
        let crossed = match (&mut level.items, item) {
            (Items::Bytes(bytes), LeafItem::Byte(b)) => {
                bytes.push(b);
                level.hasher.hash_byte(b)
            }
            (Items::Values(values), LeafItem::Value(v)) => {
                let crossed = level.hasher.hash_bytes(&v.encode());
                values.push(v);
                crossed
            }
            (Items::Entries(entries), LeafItem::Entry(e)) => {
                let mut bytes = e.key.encode();
                bytes.extend_from_slice(&e.value.encode());
                let crossed = level.hasher.hash_bytes(&bytes);
                entries.push(e);
                crossed
            }
            _ => unreachable!("item shape does not match sequence kind"),
        };
        if crossed {
            self.cut(0)?;
        }
        Ok(())
    }

    // Turn the buffered items at `level` into a chunk and push its tuple
    // one level up.
    fn cut(&mut self, level: usize) -> ValueResult<()> {
        let items = {
            let slot = &mut self.levels[level];
            slot.hasher = RollingHasher::new(self.config);
            std::mem::replace(&mut slot.items, fresh_items(self.kind, level))
        };
        let seq = make_sequence(self.kind, level as u8, items);
        let num_leaves = seq.num_leaves();
        let key = seq.last_order_key();
        let child = self.store.write_value(&seq.into_value())?;
        let tuple = MetaTuple {
            child,
            key,
            num_leaves,
        };

        if self.levels.len() == level + 1 {
            self.levels.push(Level {
                items: Items::Metas(Vec::new()),
                hasher: RollingHasher::new(self.config),
            });
        }
        let parent = &mut self.levels[level + 1];
        let crossed = parent.hasher.hash_bytes(&codec::encode_order_key(&tuple.key));
        match &mut parent.items {
            Items::Metas(tuples) => tuples.push(tuple),
            _ => unreachable!("parent levels hold meta tuples"),
        }
        if crossed {
            self.cut(level + 1)?;
        }
        Ok(())
    }

    /// Flush trailing items and return the root sequence.
    pub fn finish(mut self) -> ValueResult<Arc<Sequence>> {
        let mut level = 0;
        loop {
            if level + 1 == self.levels.len() {
                let slot = &mut self.levels[level];
                let items = std::mem::replace(&mut slot.items, fresh_items(self.kind, level));
                let root = make_sequence(self.kind, level as u8, items);
                return self.canonicalize(root);
            }
            if !self.levels[level].items.is_empty() {
                self.cut(level)?;
            }
            level += 1;
        }
    }

    // A meta root with a single entry carries no information: descend
    // until the root either is a leaf or fans out.
    fn canonicalize(&self, mut root: Sequence) -> ValueResult<Arc<Sequence>> {
        loop {
            let only_child = match root.meta_tuples() {
                Some(tuples) if tuples.len() == 1 => tuples[0].child.address(),
                _ => return Ok(Arc::new(root)),
            };
            let child = self.store.read_value(&only_child)?;
            match child.sequence() {
                Some(seq) => root = seq.clone(),
                None => return Ok(Arc::new(root)),
            }
        }
    }
}

fn fresh_items(kind: Kind, level: usize) -> Items {
    if level == 0 {
        Items::new_leaf(kind)
    } else {
        Items::Metas(Vec::new())
    }
}

fn make_sequence(kind: Kind, level: u8, items: Items) -> Sequence {
    if level == 0 {
        Sequence::new_leaf(kind, items.into_data())
    } else {
        match items {
            Items::Metas(tuples) => Sequence::new_meta(kind, level, tuples),
            _ => unreachable!("non-leaf level holds meta tuples"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemValueStore;
    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};

    fn build_blob(store: &MemValueStore, data: &[u8]) -> Arc<Sequence> {
        let mut builder = TreeBuilder::new(store, Kind::Blob, ChunkConfig::DEFAULT);
        for &b in data {
            builder.push(LeafItem::Byte(b)).unwrap();
        }
        builder.finish().unwrap()
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);
        data
    }

    #[test]
    fn small_input_stays_a_single_leaf() {
        let store = MemValueStore::new();
        let root = build_blob(&store, b"tiny");
        assert!(root.is_leaf());
        assert_eq!(root.num_leaves(), 4);
    }

    #[test]
    fn empty_input_is_an_empty_leaf() {
        let store = MemValueStore::new();
        let root = build_blob(&store, b"");
        assert!(root.is_leaf());
        assert_eq!(root.num_leaves(), 0);
    }

    #[test]
    fn large_input_chunks_into_a_meta_tree() {
        let store = MemValueStore::new();
        let data = random_bytes(64 * 1024, 3);
        let root = build_blob(&store, &data);
        assert!(!root.is_leaf(), "64 KiB must chunk");
        assert_eq!(root.num_leaves(), data.len() as u64);

        let tuples = root.meta_tuples().unwrap();
        assert!(tuples.len() > 1, "root should fan out");
        let total: u64 = tuples.iter().map(|t| t.num_leaves).sum();
        assert_eq!(total, data.len() as u64);
    }

    fn to_value(root: Arc<Sequence>) -> Value {
        Arc::try_unwrap(root)
            .unwrap_or_else(|arc| (*arc).clone())
            .into_value()
    }

    #[test]
    fn tree_shape_is_deterministic() {
        let data = random_bytes(128 * 1024, 5);
        let s1 = MemValueStore::new();
        let s2 = MemValueStore::new();
        let r1 = to_value(build_blob(&s1, &data));
        let r2 = to_value(build_blob(&s2, &data));
        assert_eq!(r1.address(), r2.address());
    }

    #[test]
    fn meta_keys_are_strictly_increasing() {
        let store = MemValueStore::new();
        // Many distinct sorted string values force a meta level.
        let mut builder = TreeBuilder::new(&store, Kind::Set, ChunkConfig {
            window: 64,
            pattern_bits: 6, // small chunks so the tree forms quickly
        });
        let mut values: Vec<Value> = (0..2000)
            .map(|i| Value::String(format!("member-{i:06}")))
            .collect();
        values.sort_by(|a, b| {
            crate::sequence::OrderKey::for_value(a)
                .compare(&crate::sequence::OrderKey::for_value(b))
        });
        for v in values {
            builder.push(LeafItem::Value(v)).unwrap();
        }
        let root = builder.finish().unwrap();
        if let Some(tuples) = root.meta_tuples() {
            for pair in tuples.windows(2) {
                assert_eq!(
                    pair[0].key.compare(&pair[1].key),
                    std::cmp::Ordering::Less,
                    "meta keys must strictly increase"
                );
            }
        } else {
            panic!("2000 members should not fit one leaf");
        }
    }

}
