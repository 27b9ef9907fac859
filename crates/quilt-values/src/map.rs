use std::sync::Arc;

use quilt_hash::ChunkConfig;

use crate::chunker::{LeafItem, TreeBuilder};
use crate::cursor::{collect_items, Cursor};
use crate::error::ValueResult;
use crate::kind::Kind;
use crate::sequence::{MapEntry, OrderKey, Sequence};
use crate::store::{ValueReader, ValueStore};
use crate::value::Value;

/// An immutable sorted map from values to values.
///
/// Entries are kept in ordering-key order (bools, numbers, and strings
/// by content; other kinds by address), which makes equal maps
/// chunk-identical regardless of insertion history.
#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    seq: Arc<Sequence>,
}

impl Map {
    pub fn empty() -> Self {
        Self {
            seq: Arc::new(Sequence::empty(Kind::Map)),
        }
    }

    pub(crate) fn from_sequence(seq: Arc<Sequence>) -> Self {
        Self { seq }
    }

    /// Build from key/value pairs. Pairs are sorted; on duplicate keys
    /// the last pair wins.
    pub fn from_entries(
        store: &dyn ValueStore,
        entries: Vec<(Value, Value)>,
    ) -> ValueResult<Self> {
        let mut keyed: Vec<(OrderKey, MapEntry)> = entries
            .into_iter()
            .map(|(k, v)| (OrderKey::for_value(&k), MapEntry::new(k, v)))
            .collect();
        keyed.sort_by(|a, b| a.0.compare(&b.0));
        // Last write wins: keep the later of equal-keyed runs.
        let mut deduped: Vec<(OrderKey, MapEntry)> = Vec::with_capacity(keyed.len());
        for (key, entry) in keyed {
            match deduped.last() {
                Some((prev, _)) if prev.compare(&key) == std::cmp::Ordering::Equal => {
                    let last = deduped.len() - 1;
                    deduped[last] = (key, entry);
                }
                _ => deduped.push((key, entry)),
            }
        }

        let mut builder = TreeBuilder::new(store, Kind::Map, ChunkConfig::DEFAULT);
        for (_, entry) in deduped {
            builder.push(LeafItem::Entry(entry))?;
        }
        Ok(Self {
            seq: builder.finish()?,
        })
    }

    pub fn sequence(&self) -> &Sequence {
        &self.seq
    }

    pub fn len(&self) -> u64 {
        self.seq.num_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seek(&self, store: &dyn ValueReader, key: &Value) -> ValueResult<Option<MapEntry>> {
        let target = OrderKey::for_value(key);
        let cursor = Cursor::at_key(store, Arc::clone(&self.seq), &target)?;
        match cursor.current() {
            Some(LeafItem::Entry(entry)) if &entry.key == key => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// The value at `key`, if present.
    pub fn get(&self, store: &dyn ValueReader, key: &Value) -> ValueResult<Option<Value>> {
        Ok(self.seek(store, key)?.map(|e| e.value))
    }

    pub fn has(&self, store: &dyn ValueReader, key: &Value) -> ValueResult<bool> {
        Ok(self.seek(store, key)?.is_some())
    }

    /// All entries in key order.
    pub fn entries(&self, store: &dyn ValueReader) -> ValueResult<Vec<MapEntry>> {
        let items = collect_items(store, Arc::clone(&self.seq))?;
        Ok(items
            .into_iter()
            .map(|i| match i {
                LeafItem::Entry(e) => e,
                _ => unreachable!("map leaves hold entries"),
            })
            .collect())
    }

    /// The idx-th entry in key order; negative counts from the end.
    pub fn entry_at(&self, store: &dyn ValueReader, idx: i64) -> ValueResult<Option<MapEntry>> {
        let len = self.len() as i64;
        let effective = if idx < 0 { len + idx } else { idx };
        if effective < 0 || effective >= len {
            return Ok(None);
        }
        let cursor = Cursor::at_index(store, Arc::clone(&self.seq), effective as u64)?;
        Ok(cursor.current().map(|i| match i {
            LeafItem::Entry(e) => e,
            _ => unreachable!("map leaves hold entries"),
        }))
    }

    /// Find an entry whose key has the given address.
    pub fn entry_by_key_address(
        &self,
        store: &dyn ValueReader,
        address: quilt_hash::Address,
    ) -> ValueResult<Option<MapEntry>> {
        let target = OrderKey::ByAddress(address);
        let mut cursor = Cursor::at_key(store, Arc::clone(&self.seq), &target)?;
        // Entries whose keys order by address sit together; scan the run.
        while let Some(LeafItem::Entry(entry)) = cursor.current() {
            if entry.key.address() == address {
                return Ok(Some(entry));
            }
            if OrderKey::for_value(&entry.key).compare(&target) != std::cmp::Ordering::Equal {
                break;
            }
            cursor.advance()?;
        }
        Ok(None)
    }

    /// A copy with `key` set to `value`.
    pub fn insert(&self, store: &dyn ValueStore, key: Value, value: Value) -> ValueResult<Self> {
        let mut pairs: Vec<(Value, Value)> = self
            .entries(store)?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect();
        pairs.push((key, value));
        Self::from_entries(store, pairs)
    }

    /// A copy without `key`; unchanged if absent.
    pub fn remove(&self, store: &dyn ValueStore, key: &Value) -> ValueResult<Self> {
        let pairs: Vec<(Value, Value)> = self
            .entries(store)?
            .into_iter()
            .filter(|e| &e.key != key)
            .map(|e| (e.key, e.value))
            .collect();
        Self::from_entries(store, pairs)
    }
}
