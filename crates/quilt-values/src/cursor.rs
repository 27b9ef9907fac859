//! Depth-indexed iteration over chunked sequences.
//!
//! A [`Cursor`] holds one `(sequence, index)` pair per tree level, leaf
//! last. Non-leaf levels always point at a real child; only the leaf
//! index may step outside its chunk, to `-1` (before the first item) or
//! `len` (past the last), both reported by `valid() == false` and both
//! re-enterable from the matching direction.

use std::sync::Arc;

use crate::chunker::LeafItem;
use crate::error::{ValueError, ValueResult};
use crate::kind::Kind;
use crate::sequence::{OrderKey, Sequence, SequenceData};
use crate::store::ValueReader;

struct CursorLevel {
    seq: Arc<Sequence>,
    idx: isize,
}

/// A position within a chunked sequence's leaf items.
pub struct Cursor<'a> {
    store: &'a dyn ValueReader,
    levels: Vec<CursorLevel>,
}

impl<'a> Cursor<'a> {
    /// Position at the first item (invalid immediately if the sequence
    /// is empty).
    pub fn at_start(store: &'a dyn ValueReader, root: Arc<Sequence>) -> ValueResult<Self> {
        let mut cursor = Self {
            store,
            levels: vec![CursorLevel { seq: root, idx: 0 }],
        };
        cursor.descend_first(0)?;
        Ok(cursor)
    }

    /// Position at the idx-th item; an index past the end yields the
    /// off-end state.
    pub fn at_index(
        store: &'a dyn ValueReader,
        root: Arc<Sequence>,
        index: u64,
    ) -> ValueResult<Self> {
        let total = root.num_leaves();
        if index >= total {
            // Off-end state: ancestors point at their last children, the
            // leaf index sits one past its chunk.
            let root_last = root.local_len().saturating_sub(1) as isize;
            let mut cursor = Self {
                store,
                levels: vec![CursorLevel {
                    seq: root,
                    idx: root_last,
                }],
            };
            cursor.descend_last(0)?;
            let leaf = cursor.levels.last_mut().expect("cursor has levels");
            leaf.idx = leaf.seq.local_len() as isize;
            return Ok(cursor);
        }

        let mut cursor = Self {
            store,
            levels: vec![CursorLevel { seq: root, idx: 0 }],
        };
        let mut remaining = index;
        loop {
            let level = cursor.levels.len() - 1;
            let seq = Arc::clone(&cursor.levels[level].seq);
            match seq.meta_tuples() {
                None => {
                    cursor.levels[level].idx = remaining as isize;
                    return Ok(cursor);
                }
                Some(tuples) => {
                    let mut child_idx = 0usize;
                    for (i, t) in tuples.iter().enumerate() {
                        if remaining < t.num_leaves {
                            child_idx = i;
                            break;
                        }
                        remaining -= t.num_leaves;
                    }
                    cursor.levels[level].idx = child_idx as isize;
                    let child = cursor.load_child(&seq, child_idx)?;
                    cursor.levels.push(CursorLevel { seq: child, idx: 0 });
                }
            }
        }
    }

    /// Position at the first item whose ordering key is >= `key`
    /// (off-end if every key is smaller). Map and Set sequences only.
    pub fn at_key(
        store: &'a dyn ValueReader,
        root: Arc<Sequence>,
        key: &OrderKey,
    ) -> ValueResult<Self> {
        let mut cursor = Self {
            store,
            levels: vec![CursorLevel { seq: root, idx: 0 }],
        };
        loop {
            let level = cursor.levels.len() - 1;
            let seq = Arc::clone(&cursor.levels[level].seq);
            match &seq.data {
                SequenceData::Meta(tuples) => {
                    // First child whose last key is >= target.
                    let child_idx = tuples
                        .partition_point(|t| t.key.compare(key) == std::cmp::Ordering::Less);
                    let child_idx = child_idx.min(tuples.len() - 1);
                    cursor.levels[level].idx = child_idx as isize;
                    let child = cursor.load_child(&seq, child_idx)?;
                    cursor.levels.push(CursorLevel { seq: child, idx: 0 });
                }
                SequenceData::Entries(entries) => {
                    let idx = entries.partition_point(|e| {
                        OrderKey::for_value(&e.key).compare(key) == std::cmp::Ordering::Less
                    });
                    cursor.levels[level].idx = idx as isize;
                    return Ok(cursor);
                }
                SequenceData::Values(values) => {
                    let idx = values.partition_point(|v| {
                        OrderKey::for_value(v).compare(key) == std::cmp::Ordering::Less
                    });
                    cursor.levels[level].idx = idx as isize;
                    return Ok(cursor);
                }
                SequenceData::Bytes(_) => {
                    return Err(ValueError::PathResolve(Kind::Blob));
                }
            }
        }
    }

    /// Whether the cursor sits on an item.
    pub fn valid(&self) -> bool {
        let leaf = self.levels.last().expect("cursor has levels");
        leaf.idx >= 0 && (leaf.idx as usize) < leaf.seq.local_len()
    }

    /// The item under the cursor.
    pub fn current(&self) -> Option<LeafItem> {
        if !self.valid() {
            return None;
        }
        let leaf = self.levels.last().expect("cursor has levels");
        let i = leaf.idx as usize;
        Some(match &leaf.seq.data {
            SequenceData::Bytes(bytes) => LeafItem::Byte(bytes[i]),
            SequenceData::Values(values) => LeafItem::Value(values[i].clone()),
            SequenceData::Entries(entries) => LeafItem::Entry(entries[i].clone()),
            SequenceData::Meta(_) => unreachable!("leaf level holds leaf data"),
        })
    }

    /// Step forward. Returns the new validity.
    pub fn advance(&mut self) -> ValueResult<bool> {
        let leaf_pos = self.levels.len() - 1;
        {
            // Covers re-entry from the before-start state too: -1 steps
            // to item 0.
            let leaf = &mut self.levels[leaf_pos];
            if leaf.idx + 1 < leaf.seq.local_len() as isize {
                leaf.idx += 1;
                return Ok(true);
            }
        }

        // Find the deepest ancestor that can move right.
        let mut level = leaf_pos;
        while level > 0 {
            level -= 1;
            let can = {
                let l = &self.levels[level];
                (l.idx as usize) + 1 < l.seq.local_len()
            };
            if can {
                self.levels[level].idx += 1;
                self.descend_first(level)?;
                return Ok(self.valid());
            }
        }

        // Fully at the end.
        let leaf = &mut self.levels[leaf_pos];
        leaf.idx = leaf.seq.local_len() as isize;
        Ok(false)
    }

    /// Step backward. Returns the new validity.
    pub fn retreat(&mut self) -> ValueResult<bool> {
        let leaf_pos = self.levels.len() - 1;
        {
            let leaf = &mut self.levels[leaf_pos];
            if leaf.idx > 0 {
                leaf.idx -= 1;
                return Ok(leaf.idx < leaf.seq.local_len() as isize);
            }
        }

        let mut level = leaf_pos;
        while level > 0 {
            level -= 1;
            if self.levels[level].idx > 0 {
                self.levels[level].idx -= 1;
                self.descend_last(level)?;
                return Ok(self.valid());
            }
        }

        // Fully before the start.
        self.levels[leaf_pos].idx = -1;
        Ok(false)
    }

    // Load children of levels[level] downward, each at its first item.
    fn descend_first(&mut self, level: usize) -> ValueResult<()> {
        self.levels.truncate(level + 1);
        loop {
            let last = self.levels.last().expect("cursor has levels");
            if last.seq.is_leaf() {
                return Ok(());
            }
            let seq = Arc::clone(&last.seq);
            let idx = last.idx.max(0) as usize;
            let child = self.load_child(&seq, idx)?;
            self.levels.push(CursorLevel { seq: child, idx: 0 });
        }
    }

    // Load children of levels[level] downward, each at its last item.
    fn descend_last(&mut self, level: usize) -> ValueResult<()> {
        self.levels.truncate(level + 1);
        loop {
            let last = self.levels.last().expect("cursor has levels");
            if last.seq.is_leaf() {
                return Ok(());
            }
            let seq = Arc::clone(&last.seq);
            let idx = last.idx.max(0) as usize;
            let child = self.load_child(&seq, idx)?;
            let child_last = child.local_len().saturating_sub(1) as isize;
            self.levels.push(CursorLevel {
                seq: child,
                idx: child_last,
            });
        }
    }

    fn load_child(&self, seq: &Sequence, idx: usize) -> ValueResult<Arc<Sequence>> {
        let tuples = seq.meta_tuples().expect("descending through a meta node");
        let address = tuples[idx].child.address();
        let value = self.store.read_value(&address)?;
        match value.sequence() {
            Some(child) => Ok(Arc::new(child.clone())),
            None => Err(ValueError::Decode(format!(
                "chunk {address} is not a sequence node"
            ))),
        }
    }
}

/// Collect every leaf item of a sequence in order.
pub fn collect_items(
    store: &dyn ValueReader,
    root: Arc<Sequence>,
) -> ValueResult<Vec<LeafItem>> {
    let mut items = Vec::with_capacity(root.num_leaves() as usize);
    let mut cursor = Cursor::at_start(store, root)?;
    while cursor.valid() {
        items.push(cursor.current().expect("valid cursor has an item"));
        cursor.advance()?;
    }
    Ok(items)
}
