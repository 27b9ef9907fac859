use std::sync::Arc;

use quilt_chunks::ChunkStore;
use quilt_hash::Address;
use quilt_values::store::{read_value_from, write_value_to};
use quilt_values::{Map, Ref, Struct, Value, ValueReader, ValueResult, ValueWriter};
use tracing::debug;

use crate::commit::{commit_ref, is_commit, new_commit, CommitOptions};
use crate::error::{DataError, DataResult};

/// Commit retry bound when the root moves under us.
const MAX_COMMIT_RETRIES: u32 = 8;

/// A database: values plus named dataset history over one chunk store.
///
/// The store root names a `Map<String, Ref<Commit>>`. All dataset-head
/// movement funnels through [`Database::commit`], which serializes
/// against concurrent writers via the store's root compare-and-set.
pub struct Database {
    store: Arc<dyn ChunkStore>,
}

impl Database {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// The datasets map at the current root. Empty for a fresh database.
    pub fn datasets(&self) -> DataResult<Map> {
        let root = self.store.root()?;
        if root.is_empty() {
            return Ok(Map::empty());
        }
        match self.read_value(&root)? {
            Value::Map(m) => Ok(m),
            _ => Err(DataError::Value(quilt_values::ValueError::Decode(
                "database root is not a datasets map".into(),
            ))),
        }
    }

    /// The ref the named dataset currently points at.
    pub fn head_ref(&self, dataset_id: &str) -> DataResult<Option<Ref>> {
        let datasets = self.datasets()?;
        match datasets.get(self, &Value::String(dataset_id.into()))? {
            Some(Value::Ref(r)) => Ok(Some(r)),
            Some(_) => Err(DataError::NotACommit),
            None => Ok(None),
        }
    }

    /// The named dataset's head commit.
    pub fn head(&self, dataset_id: &str) -> DataResult<Option<Value>> {
        match self.head_ref(dataset_id)? {
            Some(r) => {
                let commit = self.read_value(&r.address())?;
                if !is_commit(&commit) {
                    return Err(DataError::NotACommit);
                }
                Ok(Some(commit))
            }
            None => Ok(None),
        }
    }

    /// Commit `value` to the named dataset and return the new head.
    ///
    /// Builds the commit (parents defaulting to the current head),
    /// writes it, and swings the dataset pointer with a root CAS,
    /// rebasing and retrying on contention up to a bounded count. An
    /// explicit parents list must include the current head.
    pub fn commit(
        &self,
        dataset_id: &str,
        value: Value,
        options: CommitOptions,
    ) -> DataResult<Value> {
        for attempt in 0..MAX_COMMIT_RETRIES {
            let expected = self.store.root()?;
            let datasets = self.datasets()?;
            let current = match datasets.get(self, &Value::String(dataset_id.into()))? {
                Some(Value::Ref(r)) => Some(r),
                Some(_) => return Err(DataError::NotACommit),
                None => None,
            };

            let parents = match &options.parents {
                Some(explicit) => {
                    if let Some(head) = &current {
                        if !explicit.iter().any(|p| p.address() == head.address()) {
                            return Err(DataError::NotAncestor(dataset_id.to_string()));
                        }
                    }
                    explicit.clone()
                }
                None => current.clone().into_iter().collect(),
            };
            let meta = match &options.meta {
                Some(m) => m.clone(),
                None => Struct::new("", vec![]).map_err(DataError::Value)?,
            };

            let commit = new_commit(self, value.clone(), parents, meta)?;
            let commit_value = Value::Struct(commit);
            self.write_value(&commit_value)?;
            let new_head = commit_ref(&commit_value);

            let updated = datasets.insert(
                self,
                Value::String(dataset_id.into()),
                Value::Ref(new_head),
            )?;
            let new_root = self.write_value(&Value::Map(updated))?.address();

            if self.store.commit(new_root, expected)? {
                debug!(dataset = dataset_id, root = %new_root.short(), "dataset head advanced");
                return Ok(commit_value);
            }
            debug!(dataset = dataset_id, attempt, "root moved, rebasing commit");
            // The store rebased its view on failure; loop re-reads state.
        }
        Err(DataError::TooManyRetries(MAX_COMMIT_RETRIES))
    }

    /// Remove a dataset. Returns `true` if it existed.
    pub fn delete_dataset(&self, dataset_id: &str) -> DataResult<bool> {
        for _ in 0..MAX_COMMIT_RETRIES {
            let expected = self.store.root()?;
            let datasets = self.datasets()?;
            let key = Value::String(dataset_id.into());
            if !datasets.has(self, &key)? {
                return Ok(false);
            }
            let updated = datasets.remove(self, &key)?;
            let new_root = self.write_value(&Value::Map(updated))?.address();
            if self.store.commit(new_root, expected)? {
                return Ok(true);
            }
        }
        Err(DataError::TooManyRetries(MAX_COMMIT_RETRIES))
    }

    /// Walk a dataset's history child to parent along first parents.
    pub fn log(&self, dataset_id: &str) -> DataResult<Vec<Value>> {
        let mut commits = Vec::new();
        let mut cursor = self.head_ref(dataset_id)?;
        while let Some(r) = cursor {
            let commit = self.read_value(&r.address())?;
            if !is_commit(&commit) {
                return Err(DataError::NotACommit);
            }
            cursor = first_parent(&commit, self)?;
            commits.push(commit);
        }
        Ok(commits)
    }
}

/// The first parent ref of a commit, in set order.
pub fn first_parent(commit: &Value, reader: &dyn ValueReader) -> DataResult<Option<Ref>> {
    let parents = parent_refs(commit, reader)?;
    Ok(parents.into_iter().next())
}

/// All parent refs of a commit.
pub fn parent_refs(commit: &Value, reader: &dyn ValueReader) -> DataResult<Vec<Ref>> {
    let s = match commit {
        Value::Struct(s) => s,
        _ => return Err(DataError::NotACommit),
    };
    let parents = match s.get("parents") {
        Some(Value::Set(set)) => set,
        _ => return Err(DataError::NotACommit),
    };
    let mut refs = Vec::new();
    for member in parents.members(reader)? {
        match member {
            Value::Ref(r) => refs.push(r),
            _ => return Err(DataError::NotACommit),
        }
    }
    Ok(refs)
}

impl ValueReader for Database {
    fn read_value(&self, address: &Address) -> ValueResult<Value> {
        read_value_from(&*self.store, address)
    }
}

impl ValueWriter for Database {
    fn write_value(&self, value: &Value) -> ValueResult<Ref> {
        write_value_to(&*self.store, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_chunks::MemoryChunkStore;
    use quilt_values::Blob;

    fn fresh_db() -> Database {
        Database::new(Arc::new(MemoryChunkStore::new()))
    }

    fn committed_value(commit: &Value) -> Value {
        match commit {
            Value::Struct(s) => s.get("value").cloned().expect("commit has value"),
            other => panic!("not a commit: {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Blob round trip through a database (scenario: fresh-db blob)
    // -------------------------------------------------------------------

    #[test]
    fn blob_roundtrip_through_fresh_database() {
        let db = fresh_db();
        let blob = Blob::from_bytes(&db, b"hello").unwrap();
        let value = Value::Blob(blob);
        let r = db.write_value(&value).unwrap();

        let read_back = db.read_value(&r.address()).unwrap();
        match read_back {
            Value::Blob(b) => assert_eq!(b.bytes(&db).unwrap(), b"hello"),
            other => panic!("expected blob, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Dataset commits (scenario: two-commit history)
    // -------------------------------------------------------------------

    #[test]
    fn fresh_database_has_no_datasets() {
        let db = fresh_db();
        assert!(db.datasets().unwrap().is_empty());
        assert!(db.head("main").unwrap().is_none());
    }

    #[test]
    fn first_commit_creates_the_dataset() {
        let db = fresh_db();
        let commit = db
            .commit("main", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        assert!(is_commit(&commit));
        assert_eq!(committed_value(&commit), Value::Number(1.0));

        let head = db.head("main").unwrap().expect("head exists");
        assert_eq!(head, commit);
        assert!(parent_refs(&head, &db).unwrap().is_empty());
    }

    #[test]
    fn second_commit_links_to_the_first() {
        let db = fresh_db();
        db.commit("main", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        let first_head = db.head_ref("main").unwrap().unwrap();

        db.commit("main", Value::Number(2.0), CommitOptions::default())
            .unwrap();

        let log = db.log("main").unwrap();
        assert_eq!(log.len(), 2);
        // Child to parent order.
        assert_eq!(committed_value(&log[0]), Value::Number(2.0));
        assert_eq!(committed_value(&log[1]), Value::Number(1.0));
        // The second commit's parents hold the first's ref.
        let parents = parent_refs(&log[0], &db).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].address(), first_head.address());
    }

    #[test]
    fn explicit_parents_must_include_the_head() {
        let db = fresh_db();
        db.commit("main", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        let head = db.head_ref("main").unwrap().unwrap();

        // Parents without the head are rejected.
        let stranger = {
            let other = fresh_db();
            other
                .commit("x", Value::Number(9.0), CommitOptions::default())
                .unwrap();
            other.head_ref("x").unwrap().unwrap()
        };
        let err = db
            .commit(
                "main",
                Value::Number(2.0),
                CommitOptions::default().with_parents(vec![stranger]),
            )
            .unwrap_err();
        assert!(matches!(err, DataError::NotAncestor(_)));

        // Including the head is accepted.
        db.commit(
            "main",
            Value::Number(2.0),
            CommitOptions::default().with_parents(vec![head]),
        )
        .unwrap();
    }

    #[test]
    fn datasets_are_independent() {
        let db = fresh_db();
        db.commit("a", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        db.commit("b", Value::String("two".into()), CommitOptions::default())
            .unwrap();

        assert_eq!(
            committed_value(&db.head("a").unwrap().unwrap()),
            Value::Number(1.0)
        );
        assert_eq!(
            committed_value(&db.head("b").unwrap().unwrap()),
            Value::String("two".into())
        );
        assert_eq!(db.datasets().unwrap().len(), 2);
    }

    #[test]
    fn delete_dataset_removes_the_pointer() {
        let db = fresh_db();
        db.commit("doomed", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        assert!(db.delete_dataset("doomed").unwrap());
        assert!(db.head("doomed").unwrap().is_none());
        assert!(!db.delete_dataset("doomed").unwrap());
    }

    #[test]
    fn commit_meta_is_preserved() {
        let db = fresh_db();
        let meta = Struct::new(
            "",
            vec![
                ("date".into(), Value::String("2016-08-01T12:00:00Z".into())),
                ("message".into(), Value::String("hello quilt".into())),
            ],
        )
        .unwrap();
        let commit = db
            .commit(
                "main",
                Value::Bool(true),
                CommitOptions::default().with_meta(meta),
            )
            .unwrap();
        match &commit {
            Value::Struct(s) => match s.get("meta") {
                Some(Value::Struct(m)) => {
                    assert_eq!(
                        m.get("message"),
                        Some(&Value::String("hello quilt".into()))
                    );
                }
                other => panic!("meta missing: {other:?}"),
            },
            other => panic!("not a commit: {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Root CAS through the database (scenario: racing commits)
    // -------------------------------------------------------------------

    #[test]
    fn racing_database_views_serialize_through_the_root() {
        let store = Arc::new(MemoryChunkStore::new());
        let db1 = Database::new(Arc::clone(&store) as Arc<dyn ChunkStore>);
        let db2 = Database::new(Arc::clone(&store) as Arc<dyn ChunkStore>);

        // Two views over one store: commits serialize through the root
        // and both datasets land.
        db1.commit("left", Value::Number(1.0), CommitOptions::default())
            .unwrap();
        db2.commit("right", Value::Number(2.0), CommitOptions::default())
            .unwrap();

        assert!(db1.head("left").unwrap().is_some());
        assert!(db1.head("right").unwrap().is_some());
    }
}
