//! Databases and the commit DAG.
//!
//! A [`Database`] wraps a chunk store and reads/writes values through
//! it. The store's root names a `Map<String, Ref<Commit>>` of datasets;
//! committing to a dataset writes a new commit struct, points the
//! dataset at it, and advances the root with a compare-and-set, rebasing
//! and retrying on contention. [`find_common_ancestor`] walks the commit
//! DAG by ref height to find merge bases.

pub mod commit;
pub mod database;
pub mod error;
pub mod lca;

pub use commit::{commit_ref, commit_type, is_commit, new_commit, CommitOptions, COMMIT_NAME};
pub use database::{first_parent, parent_refs, Database};
pub use error::{DataError, DataResult};
pub use lca::find_common_ancestor;
