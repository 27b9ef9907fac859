//! Three-way merge for Quilt values.
//!
//! Given two candidate values `a` and `b` and their common `parent`, the
//! merge keeps unilateral changes, keeps changes both sides made
//! identically, and recurses by key into maps, structs, and sets. A
//! position changed differently on both sides goes to the resolver; with
//! no resolver it is a conflict. Lists do not merge structurally — any
//! two-sided list change is a conflict. A side that removed the value
//! entirely (`None`), or sides of different kinds, conflict immediately.

use quilt_values::{
    Kind, Map, Path, PathPart, Set, Struct, Value, ValueStore,
};

use thiserror::Error;
use tracing::debug;

/// Which side of the merge a change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSide {
    A,
    B,
}

/// Errors from merging.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("conflict at {path}: both sides changed the value")]
    Conflict { path: String },

    #[error(transparent)]
    Value(#[from] quilt_values::ValueError),
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Resolver callback: given both sides' values at a conflicting path,
/// produce the merged value or decline (`None` = hard conflict).
pub type Resolver = dyn Fn(Option<&Value>, Option<&Value>, &Path) -> Option<Value> + Send + Sync;

/// The a-side always wins.
pub fn ours(a: Option<&Value>, _b: Option<&Value>, _path: &Path) -> Option<Value> {
    a.cloned()
}

/// The b-side always wins.
pub fn theirs(_a: Option<&Value>, b: Option<&Value>, _path: &Path) -> Option<Value> {
    b.cloned()
}

/// Three-way merge of `a` and `b` against `parent`.
pub fn three_way(
    store: &dyn ValueStore,
    a: Option<Value>,
    b: Option<Value>,
    parent: Option<Value>,
    resolver: Option<&Resolver>,
) -> MergeResult<Value> {
    merge_values(store, a, b, parent, &Path::root(), resolver)
}

fn merge_values(
    store: &dyn ValueStore,
    a: Option<Value>,
    b: Option<Value>,
    parent: Option<Value>,
    path: &Path,
    resolver: Option<&Resolver>,
) -> MergeResult<Value> {
    // Decision table on (a changed?, b changed?).
    let a_changed = a != parent;
    let b_changed = b != parent;

    if !a_changed && !b_changed {
        return require(parent, path);
    }
    if !b_changed {
        return require(a, path);
    }
    if !a_changed {
        return require(b, path);
    }
    if a == b {
        return require(a, path);
    }

    // Both sides changed, differently. Recurse where both sides are
    // same-kind containers; otherwise resolve or conflict.
    match (&a, &b) {
        (Some(av), Some(bv)) if mergeable(av, bv) => {
            debug!(path = %path, kind = %av.kind(), "descending into two-sided change");
            match (av, bv) {
                (Value::Struct(sa), Value::Struct(sb)) => {
                    let sp = as_struct(&parent);
                    merge_structs(store, sa, sb, sp, path, resolver)
                }
                (Value::Map(ma), Value::Map(mb)) => {
                    let mp = as_map(&parent);
                    merge_maps(store, ma, mb, mp, path, resolver)
                }
                (Value::Set(sa), Value::Set(sb)) => {
                    let sp = as_set(&parent);
                    merge_sets(store, sa, sb, sp, path)
                }
                _ => unreachable!("mergeable covers struct, map, set"),
            }
        }
        _ => resolve(a.as_ref(), b.as_ref(), path, resolver),
    }
}

// Structural merging applies to same-kind keyed containers. Lists fall
// through to conflict.
fn mergeable(a: &Value, b: &Value) -> bool {
    a.kind() == b.kind() && matches!(a.kind(), Kind::Struct | Kind::Map | Kind::Set)
}

fn resolve(
    a: Option<&Value>,
    b: Option<&Value>,
    path: &Path,
    resolver: Option<&Resolver>,
) -> MergeResult<Value> {
    match resolver.and_then(|r| r(a, b, path)) {
        Some(v) => Ok(v),
        None => Err(MergeError::Conflict {
            path: path.to_string(),
        }),
    }
}

fn require(v: Option<Value>, path: &Path) -> MergeResult<Value> {
    v.ok_or_else(|| MergeError::Conflict {
        path: path.to_string(),
    })
}

fn as_struct(v: &Option<Value>) -> Option<&Struct> {
    match v {
        Some(Value::Struct(s)) => Some(s),
        _ => None,
    }
}

fn as_map(v: &Option<Value>) -> Option<&Map> {
    match v {
        Some(Value::Map(m)) => Some(m),
        _ => None,
    }
}

fn as_set(v: &Option<Value>) -> Option<&Set> {
    match v {
        Some(Value::Set(s)) => Some(s),
        _ => None,
    }
}

fn merge_structs(
    store: &dyn ValueStore,
    a: &Struct,
    b: &Struct,
    parent: Option<&Struct>,
    path: &Path,
    resolver: Option<&Resolver>,
) -> MergeResult<Value> {
    if a.name() != b.name() {
        return resolve(
            Some(&Value::Struct(a.clone())),
            Some(&Value::Struct(b.clone())),
            path,
            resolver,
        );
    }

    let mut names: Vec<&str> = a
        .fields()
        .iter()
        .chain(b.fields().iter())
        .map(|(n, _)| n.as_str())
        .collect();
    if let Some(p) = parent {
        names.extend(p.fields().iter().map(|(n, _)| n.as_str()));
    }
    names.sort_unstable();
    names.dedup();

    let mut merged: Vec<(String, Value)> = Vec::new();
    for name in names {
        let at = path.join(PathPart::Field(name.to_string()));
        let av = a.get(name).cloned();
        let bv = b.get(name).cloned();
        let pv = parent.and_then(|p| p.get(name)).cloned();
        match merge_field(store, av, bv, pv, &at, resolver)? {
            Some(v) => merged.push((name.to_string(), v)),
            None => {} // removed on the winning side
        }
    }
    Ok(Value::Struct(Struct::new(a.name(), merged)?))
}

// Field-level merge where absence is meaningful (removal).
fn merge_field(
    store: &dyn ValueStore,
    a: Option<Value>,
    b: Option<Value>,
    parent: Option<Value>,
    path: &Path,
    resolver: Option<&Resolver>,
) -> MergeResult<Option<Value>> {
    let a_changed = a != parent;
    let b_changed = b != parent;
    if !a_changed && !b_changed {
        return Ok(parent);
    }
    if !b_changed {
        return Ok(a);
    }
    if !a_changed {
        return Ok(b);
    }
    if a == b {
        return Ok(a);
    }
    // Both changed, differently.
    match (&a, &b) {
        (Some(av), Some(bv)) if mergeable(av, bv) => {
            merge_values(store, a.clone(), b.clone(), parent, path, resolver).map(Some)
        }
        _ => match resolver.and_then(|r| r(a.as_ref(), b.as_ref(), path)) {
            Some(v) => Ok(Some(v)),
            None => Err(MergeError::Conflict {
                path: path.to_string(),
            }),
        },
    }
}

fn merge_maps(
    store: &dyn ValueStore,
    a: &Map,
    b: &Map,
    parent: Option<&Map>,
    path: &Path,
    resolver: Option<&Resolver>,
) -> MergeResult<Value> {
    let mut keys: Vec<Value> = Vec::new();
    let mut push_keys = |m: &Map| -> MergeResult<()> {
        for e in m.entries(store)? {
            if !keys.contains(&e.key) {
                keys.push(e.key);
            }
        }
        Ok(())
    };
    push_keys(a)?;
    push_keys(b)?;
    if let Some(p) = parent {
        push_keys(p)?;
    }

    let mut merged: Vec<(Value, Value)> = Vec::new();
    for key in keys {
        let at = path.join(PathPart::Index {
            key: key.clone(),
            into_key: false,
        });
        let av = a.get(store, &key)?;
        let bv = b.get(store, &key)?;
        let pv = match parent {
            Some(p) => p.get(store, &key)?,
            None => None,
        };
        if let Some(v) = merge_field(store, av, bv, pv, &at, resolver)? {
            merged.push((key, v));
        }
    }
    Ok(Value::Map(Map::from_entries(store, merged)?))
}

// Sets merge by membership arithmetic: additions union, removals apply,
// and the same member cannot "change" so there is nothing to conflict.
fn merge_sets(
    store: &dyn ValueStore,
    a: &Set,
    b: &Set,
    parent: Option<&Set>,
    _path: &Path,
) -> MergeResult<Value> {
    let parent_members: Vec<Value> = match parent {
        Some(p) => p.members(store)?,
        None => Vec::new(),
    };
    let a_members = a.members(store)?;
    let b_members = b.members(store)?;

    let mut merged: Vec<Value> = Vec::new();
    // Keep a parent member unless some side removed it.
    for m in &parent_members {
        if a_members.contains(m) && b_members.contains(m) {
            merged.push(m.clone());
        }
    }
    // Additions from either side.
    for m in a_members.iter().chain(b_members.iter()) {
        if !parent_members.contains(m) {
            merged.push(m.clone());
        }
    }
    Ok(Value::Set(Set::from_values(store, merged)?))
}
