use std::sync::Arc;

use quilt_hash::ChunkConfig;

use crate::chunker::{LeafItem, TreeBuilder};
use crate::cursor::{collect_items, Cursor};
use crate::error::ValueResult;
use crate::kind::Kind;
use crate::sequence::Sequence;
use crate::store::{ValueReader, ValueStore};
use crate::value::Value;

/// An immutable ordered sequence of values.
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    seq: Arc<Sequence>,
}

impl List {
    pub fn empty() -> Self {
        Self {
            seq: Arc::new(Sequence::empty(Kind::List)),
        }
    }

    pub(crate) fn from_sequence(seq: Arc<Sequence>) -> Self {
        Self { seq }
    }

    /// Build from values in order.
    pub fn from_values(store: &dyn ValueStore, values: Vec<Value>) -> ValueResult<Self> {
        let mut builder = TreeBuilder::new(store, Kind::List, ChunkConfig::DEFAULT);
        for v in values {
            builder.push(LeafItem::Value(v))?;
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

    /// The idx-th element, or `None` past the end.
    pub fn get(&self, store: &dyn ValueReader, idx: u64) -> ValueResult<Option<Value>> {
        if idx >= self.len() {
            return Ok(None);
        }
        let cursor = Cursor::at_index(store, Arc::clone(&self.seq), idx)?;
        Ok(cursor.current().map(|item| match item {
            LeafItem::Value(v) => v,
            _ => unreachable!("list leaves hold values"),
        }))
    }

    /// The idx-th element in order; negative counts from the end.
    pub fn item_at(&self, store: &dyn ValueReader, idx: i64) -> ValueResult<Option<Value>> {
        let len = self.len() as i64;
        let effective = if idx < 0 { len + idx } else { idx };
        if effective < 0 || effective >= len {
            return Ok(None);
        }
        self.get(store, effective as u64)
    }

    /// All elements in order.
    pub fn items(&self, store: &dyn ValueReader) -> ValueResult<Vec<Value>> {
        let items = collect_items(store, Arc::clone(&self.seq))?;
        Ok(items
            .into_iter()
            .map(|i| match i {
                LeafItem::Value(v) => v,
                _ => unreachable!("list leaves hold values"),
            })
            .collect())
    }

    /// A copy with `removed` elements at `at` replaced by `insert`.
    pub fn splice(
        &self,
        store: &dyn ValueStore,
        at: u64,
        removed: u64,
        insert: Vec<Value>,
    ) -> ValueResult<Self> {
        let mut items = self.items(store)?;
        let at = at.min(items.len() as u64) as usize;
        let end = (at + removed as usize).min(items.len());
        items.splice(at..end, insert);
        Self::from_values(store, items)
    }

    /// A copy with `value` appended.
    pub fn append(&self, store: &dyn ValueStore, value: Value) -> ValueResult<Self> {
        self.splice(store, self.len(), 0, vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemValueStore;

    fn numbers(n: u64) -> Vec<Value> {
        (0..n).map(|i| Value::Number(i as f64)).collect()
    }

    #[test]
    fn build_and_read_back() {
        let store = MemValueStore::new();
        let list = List::from_values(&store, numbers(10)).unwrap();
        assert_eq!(list.len(), 10);
        assert_eq!(list.items(&store).unwrap(), numbers(10));
        assert_eq!(list.get(&store, 3).unwrap(), Some(Value::Number(3.0)));
        assert_eq!(list.get(&store, 10).unwrap(), None);
    }

    #[test]
    fn empty_list() {
        let store = MemValueStore::new();
        let list = List::from_values(&store, vec![]).unwrap();
        assert!(list.is_empty());
        assert_eq!(list, List::empty());
    }

    #[test]
    fn mixed_kind_elements() {
        let store = MemValueStore::new();
        let values = vec![
            Value::Bool(true),
            Value::Number(1.5),
            Value::String("three".into()),
        ];
        let list = List::from_values(&store, values.clone()).unwrap();
        assert_eq!(list.items(&store).unwrap(), values);
    }

    #[test]
    fn large_list_chunks_and_reads_back() {
        let store = MemValueStore::new();
        let values = numbers(5000);
        let list = List::from_values(&store, values.clone()).unwrap();
        assert!(!list.sequence().is_leaf());
        assert_eq!(list.items(&store).unwrap(), values);
        assert_eq!(
            list.get(&store, 4321).unwrap(),
            Some(Value::Number(4321.0))
        );
    }

    #[test]
    fn equal_lists_have_equal_addresses() {
        let store = MemValueStore::new();
        let l1 = List::from_values(&store, numbers(3000)).unwrap();
        let l2 = List::from_values(&store, numbers(3000)).unwrap();
        assert_eq!(Value::List(l1).address(), Value::List(l2).address());
    }

    #[test]
    fn item_at_supports_negative_indexes() {
        let store = MemValueStore::new();
        let list = List::from_values(&store, numbers(4)).unwrap();
        assert_eq!(
            list.item_at(&store, 0).unwrap(),
            Some(Value::Number(0.0))
        );
        assert_eq!(
            list.item_at(&store, -1).unwrap(),
            Some(Value::Number(3.0))
        );
        assert_eq!(
            list.item_at(&store, -4).unwrap(),
            Some(Value::Number(0.0))
        );
        assert!(list.item_at(&store, 4).unwrap().is_none());
        assert!(list.item_at(&store, -5).unwrap().is_none());
    }

    #[test]
    fn splice_replaces_a_range() {
        let store = MemValueStore::new();
        let list = List::from_values(&store, numbers(5)).unwrap();
        let spliced = list
            .splice(&store, 1, 2, vec![Value::String("x".into())])
            .unwrap();
        assert_eq!(
            spliced.items(&store).unwrap(),
            vec![
                Value::Number(0.0),
                Value::String("x".into()),
                Value::Number(3.0),
                Value::Number(4.0),
            ]
        );
        // Source list unchanged.
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn append_adds_at_the_end() {
        let store = MemValueStore::new();
        let list = List::from_values(&store, numbers(2)).unwrap();
        let appended = list.append(&store, Value::Number(99.0)).unwrap();
        assert_eq!(appended.len(), 3);
        assert_eq!(appended.get(&store, 2).unwrap(), Some(Value::Number(99.0)));
    }
}
