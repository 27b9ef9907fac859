//! Patch application: replaying a difference stream against the left
//! value reconstructs the right value.

use quilt_values::{List, Map, PathPart, Set, Struct, Value, ValueStore};

use crate::error::{DiffError, DiffResult};
use crate::stream::{ChangeType, Difference};

// A difference plus how much of its path is already consumed.
struct Pending<'a> {
    depth: usize,
    diff: &'a Difference,
}

impl Pending<'_> {
    fn head(&self) -> &PathPart {
        &self.diff.path.parts()[self.depth]
    }

    fn is_leaf(&self) -> bool {
        self.depth + 1 == self.diff.path.parts().len()
    }
}

/// Apply a patch to `value`. For every `(v1, v2)` pair,
/// `apply(store, v1, diff(v1, v2)) == v2`.
pub fn apply(
    store: &dyn ValueStore,
    value: &Value,
    patch: &[Difference],
) -> DiffResult<Value> {
    // A root-level change replaces the whole value.
    if let Some(root_change) = patch.iter().find(|d| d.path.is_empty()) {
        if patch.len() > 1 {
            return Err(DiffError::BadPatch {
                path: String::new(),
                reason: "root change mixed with nested changes".into(),
            });
        }
        return match (&root_change.change, &root_change.new) {
            (ChangeType::Modified, Some(new)) => Ok(new.clone()),
            _ => Err(DiffError::BadPatch {
                path: String::new(),
                reason: "root change must be a modification".into(),
            }),
        };
    }

    let pending: Vec<Pending> = patch.iter().map(|d| Pending { depth: 0, diff: d }).collect();
    apply_at(store, value, pending)
}

fn apply_at(
    store: &dyn ValueStore,
    value: &Value,
    pending: Vec<Pending<'_>>,
) -> DiffResult<Value> {
    if pending.is_empty() {
        return Ok(value.clone());
    }
    match value {
        Value::Struct(s) => apply_struct(store, s, pending),
        Value::Map(m) => apply_map(store, m, pending),
        Value::Set(s) => apply_set(store, s, pending),
        Value::List(l) => apply_list(store, l, pending),
        other => Err(DiffError::BadPatch {
            path: pending[0].diff.path.to_string(),
            reason: format!("cannot descend into a {} value", other.kind()),
        }),
    }
}

// Descend into the child a part names, apply the nested diffs there, and
// hand back the rebuilt child.
fn rebuild_child<'a>(
    store: &dyn ValueStore,
    current: Option<Value>,
    group: Vec<Pending<'a>>,
) -> DiffResult<Value> {
    let path = group[0].diff.path.to_string();
    let current = current.ok_or_else(|| DiffError::BadPatch {
        path: path.clone(),
        reason: "nested change under a missing child".into(),
    })?;
    let deeper: Vec<Pending<'a>> = group
        .into_iter()
        .map(|p| Pending {
            depth: p.depth + 1,
            diff: p.diff,
        })
        .collect();
    apply_at(store, &current, deeper)
}

fn apply_struct(
    store: &dyn ValueStore,
    value: &Struct,
    pending: Vec<Pending<'_>>,
) -> DiffResult<Value> {
    let mut result = value.clone();
    let mut groups: Vec<(String, Vec<Pending>)> = Vec::new();
    for p in pending {
        let name = match p.head() {
            PathPart::Field(name) => name.clone(),
            other => {
                return Err(DiffError::BadPatch {
                    path: p.diff.path.to_string(),
                    reason: format!("{other} cannot index a struct"),
                })
            }
        };
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, g)) => g.push(p),
            None => groups.push((name, vec![p])),
        }
    }

    for (name, group) in groups {
        if group.len() == 1 && group[0].is_leaf() {
            let d = group[0].diff;
            result = match d.change {
                ChangeType::Removed => result.remove(&name),
                ChangeType::Added | ChangeType::Modified => {
                    let new = required_new(d)?;
                    result.set(&name, new).map_err(DiffError::Value)?
                }
            };
        } else {
            let child = rebuild_child(store, result.get(&name).cloned(), group)?;
            result = result.set(&name, child).map_err(DiffError::Value)?;
        }
    }
    Ok(Value::Struct(result))
}

fn apply_map(
    store: &dyn ValueStore,
    value: &Map,
    pending: Vec<Pending<'_>>,
) -> DiffResult<Value> {
    let mut result = value.clone();
    let mut groups: Vec<(Value, Vec<Pending>)> = Vec::new();
    for p in pending {
        let key = map_key_of(&p)?;
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, g)) => g.push(p),
            None => groups.push((key, vec![p])),
        }
    }

    for (key, group) in groups {
        if group.len() == 1 && group[0].is_leaf() {
            let d = group[0].diff;
            result = match d.change {
                ChangeType::Removed => result.remove(store, &key)?,
                ChangeType::Added | ChangeType::Modified => {
                    result.insert(store, key, required_new(d)?)?
                }
            };
        } else {
            let current = result.get(store, &key)?;
            let child = rebuild_child(store, current, group)?;
            result = result.insert(store, key, child)?;
        }
    }
    Ok(Value::Map(result))
}

// The map key a difference addresses: spelled in the path for primitive
// keys, carried in `new_key` for hash-addressed ones.
fn map_key_of(p: &Pending<'_>) -> DiffResult<Value> {
    match p.head() {
        PathPart::Index { key, .. } => Ok(key.clone()),
        PathPart::HashIndex { .. } => {
            p.diff.new_key.clone().ok_or_else(|| DiffError::BadPatch {
                path: p.diff.path.to_string(),
                reason: "hash-indexed change is missing its key value".into(),
            })
        }
        other => Err(DiffError::BadPatch {
            path: p.diff.path.to_string(),
            reason: format!("{other} cannot index a map"),
        }),
    }
}

fn apply_set(
    store: &dyn ValueStore,
    value: &Set,
    pending: Vec<Pending<'_>>,
) -> DiffResult<Value> {
    let mut result = value.clone();
    for p in pending {
        if !p.is_leaf() {
            return Err(DiffError::BadPatch {
                path: p.diff.path.to_string(),
                reason: "set members cannot change in place".into(),
            });
        }
        let d = p.diff;
        match d.change {
            ChangeType::Added => {
                result = result.insert(store, required_new(d)?)?;
            }
            ChangeType::Removed => {
                let old = d.old.clone().ok_or_else(|| DiffError::BadPatch {
                    path: d.path.to_string(),
                    reason: "set removal is missing the member".into(),
                })?;
                result = result.remove(store, &old)?;
            }
            ChangeType::Modified => {
                return Err(DiffError::BadPatch {
                    path: d.path.to_string(),
                    reason: "set members cannot be modified".into(),
                })
            }
        }
    }
    Ok(Value::Set(result))
}

fn apply_list(
    store: &dyn ValueStore,
    value: &List,
    pending: Vec<Pending<'_>>,
) -> DiffResult<Value> {
    let mut items = value.items(store).map_err(DiffError::Value)?;

    let index_of = |p: &Pending<'_>| -> DiffResult<usize> {
        match p.head() {
            PathPart::Index {
                key: Value::Number(n),
                ..
            } if n.fract() == 0.0 && *n >= 0.0 => Ok(*n as usize),
            other => Err(DiffError::BadPatch {
                path: p.diff.path.to_string(),
                reason: format!("{other} cannot index a list"),
            }),
        }
    };

    let mut modifies: Vec<(usize, Vec<Pending>)> = Vec::new();
    let mut removals: Vec<usize> = Vec::new();
    let mut additions: Vec<(usize, Value)> = Vec::new();
    for p in pending {
        let idx = index_of(&p)?;
        if !p.is_leaf() {
            match modifies.iter_mut().find(|(i, _)| *i == idx) {
                Some((_, g)) => g.push(p),
                None => modifies.push((idx, vec![p])),
            }
            continue;
        }
        match p.diff.change {
            ChangeType::Modified => modifies.push((idx, vec![p])),
            ChangeType::Removed => removals.push(idx),
            ChangeType::Added => additions.push((idx, required_new(p.diff)?)),
        }
    }

    // In-place modifications first (indexes refer to the old list), then
    // removals back to front, then additions front to back at their new
    // positions.
    for (idx, group) in modifies {
        let bad_index = || DiffError::BadPatch {
            path: group[0].diff.path.to_string(),
            reason: format!("index {idx} out of range"),
        };
        let current = items.get(idx).cloned().ok_or_else(bad_index)?;
        let new = if group.len() == 1 && group[0].is_leaf() {
            required_new(group[0].diff)?
        } else {
            rebuild_child(store, Some(current), group)?
        };
        items[idx] = new;
    }
    removals.sort_unstable();
    for idx in removals.into_iter().rev() {
        if idx >= items.len() {
            return Err(DiffError::BadPatch {
                path: format!("[{idx}]"),
                reason: "removal index out of range".into(),
            });
        }
        items.remove(idx);
    }
    additions.sort_by_key(|(i, _)| *i);
    for (idx, v) in additions {
        let idx = idx.min(items.len());
        items.insert(idx, v);
    }

    Ok(Value::List(List::from_values(store, items)?))
}

fn required_new(d: &Difference) -> DiffResult<Value> {
    d.new.clone().ok_or_else(|| DiffError::BadPatch {
        path: d.path.to_string(),
        reason: "change is missing its new value".into(),
    })
}
