use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use quilt_values::{
    calc_splices, seqdiff, DiffMode, Path, PathPart, Value, ValueReader, ValueResult,
};

/// How a position changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One changed position between the left and right value.
#[derive(Clone, Debug, PartialEq)]
pub struct Difference {
    /// Where the change sits, relative to the diffed roots.
    pub path: Path,
    pub change: ChangeType,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// For map entries addressed by hash (non-primitive keys): the key
    /// value itself, which the path alone cannot spell.
    pub new_key: Option<Value>,
}

/// Capacity of the stream's channel; producers block (backpressure) once
/// this many differences are unconsumed.
const STREAM_DEPTH: usize = 64;

/// A running diff: iterate to consume, drop or [`DiffStream::stop`] to
/// cancel. The producer finishes its current element and exits once the
/// stop handle closes.
pub struct DiffStream {
    rx: Option<Receiver<Difference>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<ValueResult<()>>>,
}

impl DiffStream {
    /// Signal the producer to stop; pending differences may still drain.
    pub fn stop(&mut self) {
        self.stop_tx.take();
    }

    /// Drain the stream and surface any producer error.
    pub fn finish(mut self) -> ValueResult<Vec<Difference>> {
        let collected: Vec<Difference> = self.by_ref().collect();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("diff producer panicked")?;
        }
        Ok(collected)
    }
}

impl Iterator for DiffStream {
    type Item = Difference;

    fn next(&mut self) -> Option<Difference> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for DiffStream {
    fn drop(&mut self) {
        self.stop_tx.take();
        // Dropping the receiver unblocks a producer waiting on a full
        // channel; its next send fails and it exits.
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Producer {
    store: Arc<dyn ValueReader + Send + Sync>,
    tx: Sender<Difference>,
    stop_rx: Receiver<()>,
}

enum Halt {
    Stopped,
    Failed(quilt_values::ValueError),
}

/// Start diffing `left` against `right` on a background thread.
pub fn diff(
    store: Arc<dyn ValueReader + Send + Sync>,
    left: Value,
    right: Value,
) -> DiffStream {
    let (tx, rx) = bounded(STREAM_DEPTH);
    let (stop_tx, stop_rx) = bounded(0);
    let handle = std::thread::spawn(move || {
        let producer = Producer { store, tx, stop_rx };
        match producer.diff_values(&Path::root(), &left, &right) {
            Ok(()) | Err(Halt::Stopped) => Ok(()),
            Err(Halt::Failed(e)) => Err(e),
        }
    });
    DiffStream {
        rx: Some(rx),
        stop_tx: Some(stop_tx),
        handle: Some(handle),
    }
}

/// Diff to completion and return every difference.
pub fn diff_collect(
    store: Arc<dyn ValueReader + Send + Sync>,
    left: Value,
    right: Value,
) -> ValueResult<Vec<Difference>> {
    diff(store, left, right).finish()
}

impl Producer {
    fn emit(&self, d: Difference) -> Result<(), Halt> {
        // A closed stop handle means the consumer cancelled.
        if let Err(crossbeam_channel::TryRecvError::Disconnected) = self.stop_rx.try_recv() {
            return Err(Halt::Stopped);
        }
        self.tx.send(d).map_err(|_| Halt::Stopped)
    }

    fn lift<T>(&self, r: ValueResult<T>) -> Result<T, Halt> {
        r.map_err(Halt::Failed)
    }

    fn diff_values(&self, path: &Path, left: &Value, right: &Value) -> Result<(), Halt> {
        if left == right {
            return Ok(());
        }
        let descend =
            left.kind() == right.kind() && left.kind().is_container();
        if !descend {
            return self.emit(Difference {
                path: path.clone(),
                change: ChangeType::Modified,
                old: Some(left.clone()),
                new: Some(right.clone()),
                new_key: None,
            });
        }
        match (left, right) {
            (Value::Struct(l), Value::Struct(r)) => self.diff_structs(path, l, r),
            (Value::Map(l), Value::Map(r)) => self.diff_maps(path, l, r),
            (Value::Set(l), Value::Set(r)) => self.diff_sets(path, l, r),
            (Value::List(l), Value::List(r)) => self.diff_lists(path, l, r),
            _ => unreachable!("container kinds match"),
        }
    }

    fn diff_structs(
        &self,
        path: &Path,
        left: &quilt_values::Struct,
        right: &quilt_values::Struct,
    ) -> Result<(), Halt> {
        let names: BTreeSet<&str> = left
            .fields()
            .iter()
            .chain(right.fields().iter())
            .map(|(n, _)| n.as_str())
            .collect();
        for name in names {
            let at = path.join(PathPart::Field(name.to_string()));
            match (left.get(name), right.get(name)) {
                (Some(l), Some(r)) => {
                    if l != r {
                        self.descend_or_modify(&at, l, r, None)?;
                    }
                }
                (Some(l), None) => self.emit(Difference {
                    path: at,
                    change: ChangeType::Removed,
                    old: Some(l.clone()),
                    new: None,
                    new_key: None,
                })?,
                (None, Some(r)) => self.emit(Difference {
                    path: at,
                    change: ChangeType::Added,
                    old: None,
                    new: Some(r.clone()),
                    new_key: None,
                })?,
                (None, None) => unreachable!("name came from one side"),
            }
        }
        Ok(())
    }

    fn descend_or_modify(
        &self,
        path: &Path,
        left: &Value,
        right: &Value,
        new_key: Option<Value>,
    ) -> Result<(), Halt> {
        if left.kind() == right.kind() && left.kind().is_container() {
            self.diff_values(path, left, right)
        } else {
            self.emit(Difference {
                path: path.clone(),
                change: ChangeType::Modified,
                old: Some(left.clone()),
                new: Some(right.clone()),
                new_key,
            })
        }
    }

    fn map_key_part(key: &Value) -> (PathPart, Option<Value>) {
        if key.kind().is_ordered_by_value() {
            (
                PathPart::Index {
                    key: key.clone(),
                    into_key: false,
                },
                None,
            )
        } else {
            (
                PathPart::HashIndex {
                    hash: key.address(),
                    into_key: false,
                },
                Some(key.clone()),
            )
        }
    }

    fn diff_maps(
        &self,
        path: &Path,
        left: &quilt_values::Map,
        right: &quilt_values::Map,
    ) -> Result<(), Halt> {
        let changes = self.lift(seqdiff::diff_maps(
            &*self.store,
            left,
            right,
            DiffMode::Hybrid,
        ))?;
        for change in changes {
            let (part, new_key) = Self::map_key_part(&change.key);
            let at = path.join(part);
            match change.kind {
                seqdiff::ChangeKind::Added => self.emit(Difference {
                    path: at,
                    change: ChangeType::Added,
                    old: None,
                    new: change.new,
                    new_key,
                })?,
                seqdiff::ChangeKind::Removed => self.emit(Difference {
                    path: at,
                    change: ChangeType::Removed,
                    old: change.old,
                    new: None,
                    new_key,
                })?,
                seqdiff::ChangeKind::Modified => {
                    let old = change.old.expect("modified map entry has old value");
                    let new = change.new.expect("modified map entry has new value");
                    self.descend_or_modify(&at, &old, &new, new_key)?;
                }
            }
        }
        Ok(())
    }

    fn diff_sets(
        &self,
        path: &Path,
        left: &quilt_values::Set,
        right: &quilt_values::Set,
    ) -> Result<(), Halt> {
        let changes = self.lift(seqdiff::diff_sets(
            &*self.store,
            left,
            right,
            DiffMode::Hybrid,
        ))?;
        for change in changes {
            let (part, new_key) = Self::map_key_part(&change.key);
            let at = path.join(part);
            let (change_type, old, new) = match change.kind {
                seqdiff::ChangeKind::Added => (ChangeType::Added, None, change.new),
                seqdiff::ChangeKind::Removed => (ChangeType::Removed, change.old, None),
                seqdiff::ChangeKind::Modified => {
                    unreachable!("set members are never modified in place")
                }
            };
            self.emit(Difference {
                path: at,
                change: change_type,
                old,
                new,
                new_key,
            })?;
        }
        Ok(())
    }

    fn diff_lists(
        &self,
        path: &Path,
        left: &quilt_values::List,
        right: &quilt_values::List,
    ) -> Result<(), Halt> {
        let l = self.lift(left.items(&*self.store))?;
        let r = self.lift(right.items(&*self.store))?;
        for splice in calc_splices(&l, &r) {
            if splice.removed == splice.added {
                // Aligned run: element-wise changes.
                for i in 0..splice.removed {
                    let at = path.join(PathPart::Index {
                        key: Value::Number((splice.at + i) as f64),
                        into_key: false,
                    });
                    self.descend_or_modify(
                        &at,
                        &l[(splice.at + i) as usize],
                        &r[(splice.from + i) as usize],
                        None,
                    )?;
                }
            } else {
                // Coarse span: removals by left position, additions by
                // right position.
                for i in 0..splice.removed {
                    self.emit(Difference {
                        path: path.join(PathPart::Index {
                            key: Value::Number((splice.at + i) as f64),
                            into_key: false,
                        }),
                        change: ChangeType::Removed,
                        old: Some(l[(splice.at + i) as usize].clone()),
                        new: None,
                        new_key: None,
                    })?;
                }
                for i in 0..splice.added {
                    self.emit(Difference {
                        path: path.join(PathPart::Index {
                            key: Value::Number((splice.from + i) as f64),
                            into_key: false,
                        }),
                        change: ChangeType::Added,
                        old: None,
                        new: Some(r[(splice.from + i) as usize].clone()),
                        new_key: None,
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_values::{List, Map, MemValueStore, Set, Struct};

    fn store() -> Arc<MemValueStore> {
        Arc::new(MemValueStore::new())
    }

    fn strct(fields: Vec<(&str, Value)>) -> Value {
        Value::Struct(
            Struct::new(
                "T",
                fields
                    .into_iter()
                    .map(|(n, v)| (n.to_string(), v))
                    .collect(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn equal_values_produce_no_differences() {
        let s = store();
        let v = strct(vec![("a", Value::Number(1.0))]);
        assert!(diff_collect(s, v.clone(), v).unwrap().is_empty());
    }

    #[test]
    fn primitive_change_is_one_modified_at_root() {
        let s = store();
        let diffs =
            diff_collect(s, Value::Number(1.0), Value::Number(2.0)).unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].path.is_empty());
        assert_eq!(diffs[0].change, ChangeType::Modified);
        assert_eq!(diffs[0].old, Some(Value::Number(1.0)));
        assert_eq!(diffs[0].new, Some(Value::Number(2.0)));
    }

    #[test]
    fn kind_mismatch_is_one_modified() {
        let s = store();
        let left = strct(vec![("a", Value::Number(1.0))]);
        let diffs = diff_collect(s, left, Value::Bool(true)).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change, ChangeType::Modified);
    }

    #[test]
    fn refs_compare_by_address_without_descending() {
        let s = store();
        use quilt_values::ValueWriter;
        let r1 = s.write_value(&Value::Number(1.0)).unwrap();
        let r2 = s.write_value(&Value::Number(2.0)).unwrap();
        let diffs = diff_collect(
            Arc::clone(&s) as Arc<dyn ValueReader + Send + Sync>,
            Value::Ref(r1),
            Value::Ref(r2),
        )
        .unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].path.is_empty());
    }

    #[test]
    fn struct_field_changes_carry_field_paths() {
        let s = store();
        let left = strct(vec![
            ("keep", Value::Number(0.0)),
            ("change", Value::Number(1.0)),
            ("drop", Value::Bool(true)),
        ]);
        let right = strct(vec![
            ("keep", Value::Number(0.0)),
            ("change", Value::Number(2.0)),
            ("grow", Value::String("new".into())),
        ]);
        let diffs = diff_collect(s, left, right).unwrap();
        assert_eq!(diffs.len(), 3);
        let by_path: Vec<(String, ChangeType)> = diffs
            .iter()
            .map(|d| (d.path.to_string(), d.change))
            .collect();
        assert!(by_path.contains(&(".change".into(), ChangeType::Modified)));
        assert!(by_path.contains(&(".drop".into(), ChangeType::Removed)));
        assert!(by_path.contains(&(".grow".into(), ChangeType::Added)));
    }

    #[test]
    fn nested_containers_descend() {
        let s = store();
        let inner_l = Map::from_entries(
            &*s,
            vec![(Value::String("x".into()), Value::Number(1.0))],
        )
        .unwrap();
        let inner_r = Map::from_entries(
            &*s,
            vec![(Value::String("x".into()), Value::Number(2.0))],
        )
        .unwrap();
        let left = strct(vec![("m", Value::Map(inner_l))]);
        let right = strct(vec![("m", Value::Map(inner_r))]);
        let diffs = diff_collect(s, left, right).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path.to_string(), ".m[\"x\"]");
        assert_eq!(diffs[0].change, ChangeType::Modified);
    }

    #[test]
    fn set_changes_are_membership_changes() {
        let s = store();
        let left = Value::Set(
            Set::from_values(&*s, vec![Value::Number(1.0), Value::Number(2.0)]).unwrap(),
        );
        let right = Value::Set(
            Set::from_values(&*s, vec![Value::Number(2.0), Value::Number(3.0)]).unwrap(),
        );
        let diffs = diff_collect(s, left, right).unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].change, ChangeType::Removed);
        assert_eq!(diffs[1].change, ChangeType::Added);
    }

    #[test]
    fn list_aligned_change_is_indexed_modified() {
        let s = store();
        let left = Value::List(
            List::from_values(
                &*s,
                vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)],
            )
            .unwrap(),
        );
        let right = Value::List(
            List::from_values(
                &*s,
                vec![Value::Number(1.0), Value::Number(9.0), Value::Number(3.0)],
            )
            .unwrap(),
        );
        let diffs = diff_collect(s, left, right).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path.to_string(), "[1]");
        assert_eq!(diffs[0].change, ChangeType::Modified);
    }

    #[test]
    fn non_primitive_map_keys_use_hash_paths() {
        let s = store();
        let key = Value::List(List::empty());
        let left = Value::Map(Map::from_entries(&*s, vec![]).unwrap());
        let right = Value::Map(
            Map::from_entries(&*s, vec![(key.clone(), Value::Number(1.0))]).unwrap(),
        );
        let diffs = diff_collect(s, left, right).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].new_key, Some(key.clone()));
        assert_eq!(
            diffs[0].path.to_string(),
            format!("[#{}]", key.address())
        );
    }

    #[test]
    fn stop_handle_cancels_the_producer() {
        let s = store();
        // A large disjoint pair produces thousands of differences; stop
        // after the first few and ensure the stream winds down.
        let left = Value::Map(
            Map::from_entries(
                &*s,
                (0..3000u64)
                    .map(|i| {
                        (
                            Value::String(format!("left-{i:05}")),
                            Value::Number(i as f64),
                        )
                    })
                    .collect(),
            )
            .unwrap(),
        );
        let right = Value::Map(
            Map::from_entries(
                &*s,
                (0..3000u64)
                    .map(|i| {
                        (
                            Value::String(format!("right-{i:05}")),
                            Value::Number(i as f64),
                        )
                    })
                    .collect(),
            )
            .unwrap(),
        );
        let mut stream = diff(s, left, right);
        let first: Vec<Difference> = stream.by_ref().take(5).collect();
        assert_eq!(first.len(), 5);
        stream.stop();
        // Dropping after stop joins the producer; the consumed count
        // stays far below the total.
        drop(stream);
    }
}
