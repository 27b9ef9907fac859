use std::sync::Arc;

use quilt_hash::ChunkConfig;

use crate::chunker::{LeafItem, TreeBuilder};
use crate::cursor::{collect_items, Cursor};
use crate::error::ValueResult;
use crate::kind::Kind;
use crate::sequence::{OrderKey, Sequence};
use crate::store::{ValueReader, ValueStore};
use crate::value::Value;

/// An immutable sorted set of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Set {
    seq: Arc<Sequence>,
}

impl Set {
    pub fn empty() -> Self {
        Self {
            seq: Arc::new(Sequence::empty(Kind::Set)),
        }
    }

    pub(crate) fn from_sequence(seq: Arc<Sequence>) -> Self {
        Self { seq }
    }

    /// Build from members; duplicates collapse.
    pub fn from_values(store: &dyn ValueStore, values: Vec<Value>) -> ValueResult<Self> {
        let mut keyed: Vec<(OrderKey, Value)> = values
            .into_iter()
            .map(|v| (OrderKey::for_value(&v), v))
            .collect();
        keyed.sort_by(|a, b| a.0.compare(&b.0));
        keyed.dedup_by(|a, b| a.1 == b.1);

        let mut builder = TreeBuilder::new(store, Kind::Set, ChunkConfig::DEFAULT);
        for (_, v) in keyed {
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

    /// Whether `value` is a member.
    pub fn has(&self, store: &dyn ValueReader, value: &Value) -> ValueResult<bool> {
        let target = OrderKey::for_value(value);
        let mut cursor = Cursor::at_key(store, Arc::clone(&self.seq), &target)?;
        // Address-keyed members can collide on the ordering key only by
        // address equality, but scan the equal-key run to stay honest.
        while let Some(LeafItem::Value(member)) = cursor.current() {
            if &member == value {
                return Ok(true);
            }
            if OrderKey::for_value(&member).compare(&target) != std::cmp::Ordering::Equal {
                break;
            }
            cursor.advance()?;
        }
        Ok(false)
    }

    /// All members in order.
    pub fn members(&self, store: &dyn ValueReader) -> ValueResult<Vec<Value>> {
        let items = collect_items(store, Arc::clone(&self.seq))?;
        Ok(items
            .into_iter()
            .map(|i| match i {
                LeafItem::Value(v) => v,
                _ => unreachable!("set leaves hold values"),
            })
            .collect())
    }

    /// The idx-th member in order; negative counts from the end.
    pub fn member_at(&self, store: &dyn ValueReader, idx: i64) -> ValueResult<Option<Value>> {
        let len = self.len() as i64;
        let effective = if idx < 0 { len + idx } else { idx };
        if effective < 0 || effective >= len {
            return Ok(None);
        }
        let cursor = Cursor::at_index(store, Arc::clone(&self.seq), effective as u64)?;
        Ok(cursor.current().map(|i| match i {
            LeafItem::Value(v) => v,
            _ => unreachable!("set leaves hold values"),
        }))
    }

    /// Find a member by its address.
    pub fn member_by_address(
        &self,
        store: &dyn ValueReader,
        address: quilt_hash::Address,
    ) -> ValueResult<Option<Value>> {
        let target = OrderKey::ByAddress(address);
        let cursor = Cursor::at_key(store, Arc::clone(&self.seq), &target)?;
        match cursor.current() {
            Some(LeafItem::Value(member)) if member.address() == address => Ok(Some(member)),
            _ => Ok(None),
        }
    }

    /// A copy with `value` added.
    pub fn insert(&self, store: &dyn ValueStore, value: Value) -> ValueResult<Self> {
        let mut members = self.members(store)?;
        members.push(value);
        Self::from_values(store, members)
    }

    /// A copy without `value`; unchanged if absent.
    pub fn remove(&self, store: &dyn ValueStore, value: &Value) -> ValueResult<Self> {
        let members: Vec<Value> = self
            .members(store)?
            .into_iter()
            .filter(|m| m != value)
            .collect();
        Self::from_values(store, members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemValueStore;

    fn strings(n: u64) -> Vec<Value> {
        (0..n)
            .map(|i| Value::String(format!("member-{i:05}")))
            .collect()
    }

    #[test]
    fn build_and_query() {
        let store = MemValueStore::new();
        let set = Set::from_values(&store, strings(10)).unwrap();
        assert_eq!(set.len(), 10);
        assert!(set
            .has(&store, &Value::String("member-00004".into()))
            .unwrap());
        assert!(!set.has(&store, &Value::String("outsider".into())).unwrap());
    }

    #[test]
    fn duplicates_collapse() {
        let store = MemValueStore::new();
        let set = Set::from_values(
            &store,
            vec![
                Value::Number(1.0),
                Value::Number(1.0),
                Value::Number(2.0),
            ],
        )
        .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn members_come_back_sorted() {
        let store = MemValueStore::new();
        let set = Set::from_values(
            &store,
            vec![
                Value::String("b".into()),
                Value::Number(10.0),
                Value::String("a".into()),
                Value::Bool(true),
            ],
        )
        .unwrap();
        assert_eq!(
            set.members(&store).unwrap(),
            vec![
                Value::Bool(true),
                Value::Number(10.0),
                Value::String("a".into()),
                Value::String("b".into()),
            ]
        );
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let store = MemValueStore::new();
        let mut reversed = strings(500);
        reversed.reverse();
        let s1 = Set::from_values(&store, strings(500)).unwrap();
        let s2 = Set::from_values(&store, reversed).unwrap();
        assert_eq!(Value::Set(s1).address(), Value::Set(s2).address());
    }

    #[test]
    fn large_set_chunks_and_queries() {
        let store = MemValueStore::new();
        let set = Set::from_values(&store, strings(4000)).unwrap();
        assert!(!set.sequence().is_leaf());
        assert!(set
            .has(&store, &Value::String("member-03999".into()))
            .unwrap());
        assert_eq!(set.members(&store).unwrap().len(), 4000);
    }

    #[test]
    fn insert_remove_roundtrip() {
        let store = MemValueStore::new();
        let set = Set::from_values(&store, strings(5)).unwrap();
        let grown = set.insert(&store, Value::String("zzz".into())).unwrap();
        assert_eq!(grown.len(), 6);
        let shrunk = grown.remove(&store, &Value::String("zzz".into())).unwrap();
        assert_eq!(
            Value::Set(shrunk).address(),
            Value::Set(set).address()
        );
    }

    #[test]
    fn member_at_orders_and_wraps() {
        let store = MemValueStore::new();
        let set = Set::from_values(&store, strings(3)).unwrap();
        assert_eq!(
            set.member_at(&store, 0).unwrap(),
            Some(Value::String("member-00000".into()))
        );
        assert_eq!(
            set.member_at(&store, -1).unwrap(),
            Some(Value::String("member-00002".into()))
        );
        assert!(set.member_at(&store, 3).unwrap().is_none());
    }

    #[test]
    fn non_primitive_members_are_found_by_address() {
        let store = MemValueStore::new();
        let inner = Value::List(crate::list::List::empty());
        let set = Set::from_values(&store, vec![inner.clone(), Value::Bool(true)]).unwrap();
        assert!(set.has(&store, &inner).unwrap());
        assert_eq!(
            set.member_by_address(&store, inner.address()).unwrap(),
            Some(inner)
        );
    }
}
