//! Ordered diff over Map and Set sequences.
//!
//! Two modes, per the trees' construction guarantees:
//!
//! - *Left-right*: both trees are walked in key order and merged,
//!   emitting Added/Removed/Modified changes in strict key order.
//! - *Hybrid*: at meta levels, runs of entries under chunk refs shared by
//!   both trees are skipped wholesale; the walk descends only into the
//!   divergent middle, falling back to a left-right merge there. Because
//!   chunk boundaries are content-defined, a minimally changed tree
//!   shares almost all of its chunks and the diff is sub-linear.

use std::sync::Arc;

use crate::cursor::collect_items;
use crate::chunker::LeafItem;
use crate::error::ValueResult;
use crate::map::Map;
use crate::sequence::{MapEntry, MetaTuple, OrderKey, Sequence, SequenceData};
use crate::set::Set;
use crate::store::ValueReader;
use crate::value::Value;

/// How a key changed between the left and right collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One keyed change. For maps, `old`/`new` are the entry values; for
/// sets they are the member itself (and `Modified` cannot occur).
#[derive(Clone, Debug, PartialEq)]
pub struct KeyedChange {
    pub kind: ChangeKind,
    pub key: Value,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Diff strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffMode {
    /// Walk both trees end to end.
    LeftRight,
    /// Skip shared subtrees by chunk-ref equality.
    Hybrid,
}

/// Diff two maps, producing changes in key order.
pub fn diff_maps(
    store: &dyn ValueReader,
    left: &Map,
    right: &Map,
    mode: DiffMode,
) -> ValueResult<Vec<KeyedChange>> {
    diff_roots(
        store,
        left.sequence(),
        right.sequence(),
        mode,
        entry_of_map,
    )
}

/// Diff two sets, producing changes in member order.
pub fn diff_sets(
    store: &dyn ValueReader,
    left: &Set,
    right: &Set,
    mode: DiffMode,
) -> ValueResult<Vec<KeyedChange>> {
    diff_roots(
        store,
        left.sequence(),
        right.sequence(),
        mode,
        entry_of_set,
    )
}

// An item with an ordering key and a payload to compare.
#[derive(Clone)]
struct Keyed {
    key: Value,
    order: OrderKey,
    value: Option<Value>, // map value; None for sets
}

fn entry_of_map(item: LeafItem) -> Keyed {
    match item {
        LeafItem::Entry(MapEntry { key, value }) => Keyed {
            order: OrderKey::for_value(&key),
            key,
            value: Some(value),
        },
        other => unreachable!("map leaves hold entries, got {other:?}"),
    }
}

fn entry_of_set(item: LeafItem) -> Keyed {
    match item {
        LeafItem::Value(v) => Keyed {
            order: OrderKey::for_value(&v),
            key: v,
            value: None,
        },
        other => unreachable!("set leaves hold values, got {other:?}"),
    }
}

fn diff_roots(
    store: &dyn ValueReader,
    left: &Sequence,
    right: &Sequence,
    mode: DiffMode,
    to_keyed: fn(LeafItem) -> Keyed,
) -> ValueResult<Vec<KeyedChange>> {
    let mut out = Vec::new();
    match mode {
        DiffMode::LeftRight => {
            let l = keyed_items(store, left, to_keyed)?;
            let r = keyed_items(store, right, to_keyed)?;
            merge_diff(&l, &r, &mut out);
        }
        DiffMode::Hybrid => {
            diff_hybrid(store, left, right, to_keyed, &mut out)?;
        }
    }
    Ok(out)
}

fn keyed_items(
    store: &dyn ValueReader,
    seq: &Sequence,
    to_keyed: fn(LeafItem) -> Keyed,
) -> ValueResult<Vec<Keyed>> {
    Ok(collect_items(store, Arc::new(seq.clone()))?
        .into_iter()
        .map(to_keyed)
        .collect())
}

fn diff_hybrid(
    store: &dyn ValueReader,
    left: &Sequence,
    right: &Sequence,
    to_keyed: fn(LeafItem) -> Keyed,
    out: &mut Vec<KeyedChange>,
) -> ValueResult<()> {
    if !left.is_leaf() && !right.is_leaf() {
        if let (SequenceData::Meta(lt), SequenceData::Meta(rt)) = (&left.data, &right.data) {
            if left.level == right.level {
                return diff_meta_runs(store, lt, rt, to_keyed, out);
            }
        }
    }
    // Shape mismatch or leaves: merge everything.
    let l = keyed_items(store, left, to_keyed)?;
    let r = keyed_items(store, right, to_keyed)?;
    merge_diff(&l, &r, out);
    Ok(())
}

fn diff_meta_runs(
    store: &dyn ValueReader,
    left: &[MetaTuple],
    right: &[MetaTuple],
    to_keyed: fn(LeafItem) -> Keyed,
    out: &mut Vec<KeyedChange>,
) -> ValueResult<()> {
    // Trim tuples shared by address at both ends; their subtrees are
    // byte-identical and contribute no changes.
    let mut prefix = 0usize;
    while prefix < left.len()
        && prefix < right.len()
        && left[prefix].child.address() == right[prefix].child.address()
    {
        prefix += 1;
    }
    let mut suffix = 0usize;
    while suffix < left.len() - prefix
        && suffix < right.len() - prefix
        && left[left.len() - 1 - suffix].child.address()
            == right[right.len() - 1 - suffix].child.address()
    {
        suffix += 1;
    }

    let lm = &left[prefix..left.len() - suffix];
    let rm = &right[prefix..right.len() - suffix];
    if lm.is_empty() && rm.is_empty() {
        return Ok(());
    }

    // A one-to-one divergence recurses, staying sub-linear for deep
    // trees; anything wider merges the divergent middles.
    if lm.len() == 1 && rm.len() == 1 {
        let lchild = load_sequence(store, &lm[0])?;
        let rchild = load_sequence(store, &rm[0])?;
        return diff_hybrid(store, &lchild, &rchild, to_keyed, out);
    }

    let l = collect_run(store, lm, to_keyed)?;
    let r = collect_run(store, rm, to_keyed)?;
    merge_diff(&l, &r, out);
    Ok(())
}

fn load_sequence(store: &dyn ValueReader, tuple: &MetaTuple) -> ValueResult<Sequence> {
    let value = store.read_value(&tuple.child.address())?;
    match value.sequence() {
        Some(seq) => Ok(seq.clone()),
        None => Err(crate::error::ValueError::Decode(format!(
            "chunk {} is not a sequence node",
            tuple.child.address()
        ))),
    }
}

fn collect_run(
    store: &dyn ValueReader,
    tuples: &[MetaTuple],
    to_keyed: fn(LeafItem) -> Keyed,
) -> ValueResult<Vec<Keyed>> {
    let mut items = Vec::new();
    for tuple in tuples {
        let seq = load_sequence(store, tuple)?;
        items.extend(keyed_items(store, &seq, to_keyed)?);
    }
    Ok(items)
}

// Two-pointer merge of key-sorted runs.
fn merge_diff(left: &[Keyed], right: &[Keyed], out: &mut Vec<KeyedChange>) {
    let mut i = 0usize;
    let mut j = 0usize;
    while i < left.len() && j < right.len() {
        let l = &left[i];
        let r = &right[j];
        match l.order.compare(&r.order) {
            std::cmp::Ordering::Less => {
                out.push(removed(l));
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(added(r));
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if l.key == r.key {
                    if l.value != r.value {
                        out.push(KeyedChange {
                            kind: ChangeKind::Modified,
                            key: l.key.clone(),
                            old: l.value.clone(),
                            new: r.value.clone(),
                        });
                    }
                } else {
                    // Same ordering key, different keys (address-ordered
                    // kinds): one leaves, one arrives.
                    out.push(removed(l));
                    out.push(added(r));
                }
                i += 1;
                j += 1;
            }
        }
    }
    for l in &left[i..] {
        out.push(removed(l));
    }
    for r in &right[j..] {
        out.push(added(r));
    }
}

fn removed(k: &Keyed) -> KeyedChange {
    KeyedChange {
        kind: ChangeKind::Removed,
        key: k.key.clone(),
        old: k.value.clone().or_else(|| Some(k.key.clone())),
        new: None,
    }
}

fn added(k: &Keyed) -> KeyedChange {
    KeyedChange {
        kind: ChangeKind::Added,
        key: k.key.clone(),
        old: None,
        new: k.value.clone().or_else(|| Some(k.key.clone())),
    }
}
