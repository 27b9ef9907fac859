//! Lowest common ancestor search over the commit DAG.
//!
//! Two frontiers, one per input, each a priority queue ordered by ref
//! height (address as tiebreak). Each step pops from the frontier whose
//! top is taller — both on a tie — and expands the popped commit's
//! parents. The first ref already visited from the other side is the
//! deepest common ancestor; height ordering guarantees nothing below it
//! is reached first and that the walk terminates.

use std::collections::{BinaryHeap, HashSet};

use quilt_hash::Address;
use quilt_values::{Ref, ValueReader};

use crate::database::parent_refs;
use crate::error::DataResult;

struct ByHeight(Ref);

impl PartialEq for ByHeight {
    fn eq(&self, other: &Self) -> bool {
        self.0.height() == other.0.height() && self.0.address() == other.0.address()
    }
}
impl Eq for ByHeight {}
impl PartialOrd for ByHeight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ByHeight {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .height()
            .cmp(&other.0.height())
            .then_with(|| self.0.address().cmp(&other.0.address()))
    }
}

struct Frontier {
    heap: BinaryHeap<ByHeight>,
    visited: HashSet<Address>,
}

impl Frontier {
    fn new(start: Ref) -> Self {
        let mut heap = BinaryHeap::new();
        heap.push(ByHeight(start));
        Self {
            heap,
            visited: HashSet::new(),
        }
    }

    fn top_height(&self) -> Option<u64> {
        self.heap.peek().map(|r| r.0.height())
    }

    // Pop one ref and expand its parents. Returns the popped ref, or
    // `None` when it was already visited on this side.
    fn step(&mut self, reader: &dyn ValueReader) -> DataResult<Option<Ref>> {
        let Some(ByHeight(r)) = self.heap.pop() else {
            return Ok(None);
        };
        if !self.visited.insert(r.address()) {
            return Ok(None);
        }
        let commit = reader.read_value(&r.address())?;
        for parent in parent_refs(&commit, reader)? {
            self.heap.push(ByHeight(parent));
        }
        Ok(Some(r))
    }
}

/// Find the lowest common ancestor of the commits `a` and `b` point at,
/// or `None` if their histories are unrelated.
pub fn find_common_ancestor(
    a: Ref,
    b: Ref,
    reader: &dyn ValueReader,
) -> DataResult<Option<Ref>> {
    let mut fa = Frontier::new(a);
    let mut fb = Frontier::new(b);

    loop {
        let (ha, hb) = (fa.top_height(), fb.top_height());
        match (ha, hb) {
            (None, None) => return Ok(None),
            (Some(ha), Some(hb)) => {
                if ha >= hb {
                    if let Some(r) = fa.step(reader)? {
                        if fb.visited.contains(&r.address()) {
                            return Ok(Some(r));
                        }
                    }
                }
                if hb >= ha {
                    if let Some(r) = fb.step(reader)? {
                        if fa.visited.contains(&r.address()) {
                            return Ok(Some(r));
                        }
                    }
                }
            }
            (Some(_), None) => {
                // Only one frontier left: drain it against the other's
                // visited set.
                if let Some(r) = fa.step(reader)? {
                    if fb.visited.contains(&r.address()) {
                        return Ok(Some(r));
                    }
                }
            }
            (None, Some(_)) => {
                if let Some(r) = fb.step(reader)? {
                    if fa.visited.contains(&r.address()) {
                        return Ok(Some(r));
                    }
                }
            }
        }
    }
}
