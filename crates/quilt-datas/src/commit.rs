//! The commit struct shape.
//!
//! A commit is a struct named `Commit` with exactly the fields `meta`
//! (a struct), `parents` (a set of refs to commits), and `value`. The
//! recursion in the parents type is closed with `Cycle(0)`, so the type
//! embedded in every commit ref is finite no matter how deep the
//! history grows.

use quilt_values::{
    Kind, Ref, Set, Struct, Type, Value, ValueResult, ValueStore,
};
use quilt_values::types::StructType;

pub const COMMIT_NAME: &str = "Commit";

/// The canonical commit type pattern:
/// `Struct Commit { meta: Value, parents: Set<Ref<Cycle<0>>>, value: Value }`.
pub fn commit_type() -> Type {
    Type::Struct(StructType {
        name: COMMIT_NAME.into(),
        fields: vec![
            ("meta".into(), Type::VALUE),
            (
                "parents".into(),
                Type::Set(Box::new(Type::Ref(Box::new(Type::Cycle(0))))),
            ),
            ("value".into(), Type::VALUE),
        ],
    })
}

/// Whether a value is a commit: a struct whose derived type conforms to
/// the commit pattern (unfolding cycles).
pub fn is_commit(value: &Value) -> bool {
    match value {
        Value::Struct(s) if s.name() == COMMIT_NAME => {
            // The meta field must itself be a struct.
            if !matches!(s.get("meta"), Some(Value::Struct(_))) {
                return false;
            }
            value.type_of().conforms_to(&commit_type())
        }
        _ => false,
    }
}

/// Options for a dataset commit.
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    /// Explicit parents. Defaults to the dataset's current head.
    pub parents: Option<Vec<Ref>>,
    /// Commit metadata; may carry `date` (RFC3339 UTC), `message`, and
    /// other string fields. Defaults to the empty struct.
    pub meta: Option<Struct>,
}

impl CommitOptions {
    pub fn with_parents(mut self, parents: Vec<Ref>) -> Self {
        self.parents = Some(parents);
        self
    }

    pub fn with_meta(mut self, meta: Struct) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Construct a commit struct from its pieces.
pub fn new_commit(
    store: &dyn ValueStore,
    value: Value,
    parents: Vec<Ref>,
    meta: Struct,
) -> ValueResult<Struct> {
    let parent_values: Vec<Value> = parents.into_iter().map(Value::Ref).collect();
    let parents_set = Set::from_values(store, parent_values)?;
    Struct::new(
        COMMIT_NAME,
        vec![
            ("meta".into(), Value::Struct(meta)),
            ("parents".into(), Value::Set(parents_set)),
            ("value".into(), value),
        ],
    )
}

/// A ref to a commit value, typed with the cycle-closed commit pattern.
pub fn commit_ref(commit: &Value) -> Ref {
    debug_assert_eq!(commit.kind(), Kind::Struct);
    Ref::to_value_with_type(commit, commit_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_values::MemValueStore;

    fn empty_meta() -> Struct {
        Struct::new("", vec![]).unwrap()
    }

    #[test]
    fn first_commit_is_a_commit() {
        let store = MemValueStore::new();
        let c = new_commit(&store, Value::Number(1.0), vec![], empty_meta()).unwrap();
        assert!(is_commit(&Value::Struct(c)));
    }

    #[test]
    fn chained_commit_is_a_commit() {
        let store = MemValueStore::new();
        let first = new_commit(&store, Value::Number(1.0), vec![], empty_meta()).unwrap();
        let first_ref = commit_ref(&Value::Struct(first));
        let second =
            new_commit(&store, Value::Number(2.0), vec![first_ref], empty_meta()).unwrap();
        assert!(is_commit(&Value::Struct(second)));
    }

    #[test]
    fn commit_ref_height_grows_with_history() {
        let store = MemValueStore::new();
        let first = new_commit(&store, Value::Number(1.0), vec![], empty_meta()).unwrap();
        let r1 = commit_ref(&Value::Struct(first));
        assert_eq!(r1.height(), 1);

        let second =
            new_commit(&store, Value::Number(2.0), vec![r1.clone()], empty_meta()).unwrap();
        let r2 = commit_ref(&Value::Struct(second));
        assert_eq!(r2.height(), 2);
    }

    #[test]
    fn meta_fields_ride_along() {
        let store = MemValueStore::new();
        let meta = Struct::new(
            "",
            vec![
                ("date".into(), Value::String("2016-08-01T00:00:00Z".into())),
                ("message".into(), Value::String("initial".into())),
                ("author".into(), Value::String("quilt".into())),
            ],
        )
        .unwrap();
        let c = new_commit(&store, Value::Bool(true), vec![], meta).unwrap();
        let v = Value::Struct(c.clone());
        assert!(is_commit(&v));
        match c.get("meta") {
            Some(Value::Struct(m)) => {
                assert_eq!(m.get("message"), Some(&Value::String("initial".into())));
            }
            other => panic!("meta missing: {other:?}"),
        }
    }

    #[test]
    fn lookalikes_are_rejected() {
        let store = MemValueStore::new();
        // Wrong name.
        let s = Struct::new(
            "NotCommit",
            vec![
                ("meta".into(), Value::Struct(empty_meta())),
                ("parents".into(), Value::Set(Set::empty())),
                ("value".into(), Value::Number(1.0)),
            ],
        )
        .unwrap();
        assert!(!is_commit(&Value::Struct(s)));

        // Missing field.
        let s = Struct::new(
            COMMIT_NAME,
            vec![
                ("meta".into(), Value::Struct(empty_meta())),
                ("value".into(), Value::Number(1.0)),
            ],
        )
        .unwrap();
        assert!(!is_commit(&Value::Struct(s)));

        // meta is not a struct.
        let s = Struct::new(
            COMMIT_NAME,
            vec![
                ("meta".into(), Value::Number(0.0)),
                ("parents".into(), Value::Set(Set::empty())),
                ("value".into(), Value::Number(1.0)),
            ],
        )
        .unwrap();
        assert!(!is_commit(&Value::Struct(s)));

        // parents is a set of non-refs.
        let bogus = Set::from_values(&store, vec![Value::Number(3.0)]).unwrap();
        let s = Struct::new(
            COMMIT_NAME,
            vec![
                ("meta".into(), Value::Struct(empty_meta())),
                ("parents".into(), Value::Set(bogus)),
                ("value".into(), Value::Number(1.0)),
            ],
        )
        .unwrap();
        assert!(!is_commit(&Value::Struct(s)));

        // Plain non-struct values.
        assert!(!is_commit(&Value::Number(1.0)));
    }
}
