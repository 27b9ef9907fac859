//! The manifest: the single externally stored record naming a database's
//! current root and table set.
//!
//! A manifest update is the one point of atomicity in the system. Every
//! update is conditional on the `(version, lock, root)` triple of the
//! record the writer last saw; a mismatch means another view committed
//! first, and the caller must rebase. The `lock` is a fresh uuid on every
//! successful update so ABA on the root cannot go unnoticed.

use std::path::PathBuf;
use std::sync::Arc;

use quilt_hash::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::KvTable;
use crate::error::{NbsError, NbsResult};

/// One table reference in the manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: Address,
    pub chunk_count: u32,
}

/// The per-database manifest record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub version: String,
    pub lock: String,
    pub root: Address,
    pub tables: Vec<TableSpec>,
}

impl ManifestRecord {
    /// Build a record with a freshly generated lock.
    pub fn new(version: impl Into<String>, root: Address, tables: Vec<TableSpec>) -> Self {
        Self {
            version: version.into(),
            lock: uuid::Uuid::new_v4().to_string(),
            root,
            tables,
        }
    }

    /// The conditional-update comparison: `(version, lock, root)`.
    pub fn cas_matches(&self, other: &ManifestRecord) -> bool {
        self.version == other.version && self.lock == other.lock && self.root == other.root
    }
}

fn cas_matches_opt(a: Option<&ManifestRecord>, b: Option<&ManifestRecord>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.cas_matches(b),
        _ => false,
    }
}

// The stored record a losing writer gets back. A mismatch against an
// absent record means the manifest was deleted out from under us.
fn lost_cas(current: Option<ManifestRecord>) -> NbsResult<ManifestRecord> {
    match current {
        Some(current) => {
            debug!(root = %current.root.short(), "manifest CAS lost");
            Ok(current)
        }
        None => Err(NbsError::Backend(
            "manifest disappeared from the backing store".into(),
        )),
    }
}

/// Storage backend for the manifest record.
pub trait ManifestBackend: Send + Sync {
    /// Read the current record; `None` if the database has never been
    /// committed to.
    fn fetch(&self) -> NbsResult<Option<ManifestRecord>>;

    /// Conditionally replace the record: the write happens iff the stored
    /// record matches `expected` on `(version, lock, root)`. Returns the
    /// record that is stored afterwards — `new` on success, the current
    /// record on mismatch.
    fn update(
        &self,
        expected: Option<&ManifestRecord>,
        new: &ManifestRecord,
    ) -> NbsResult<ManifestRecord>;
}

// ---------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "manifest.lock";
const LOCK_ATTEMPTS: u32 = 1000;

/// Manifest stored as a JSON document in a directory, with updates
/// serialized through an exclusive lock file and made visible by atomic
/// rename.
pub struct FileManifestBackend {
    dir: PathBuf,
}

struct LockGuard(PathBuf);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl FileManifestBackend {
    pub fn new(dir: impl Into<PathBuf>) -> NbsResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn acquire_lock(&self) -> NbsResult<LockGuard> {
        let path = self.dir.join(LOCK_FILE);
        for _ in 0..LOCK_ATTEMPTS {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(LockGuard(path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(NbsError::LockTimeout)
    }

    fn read_record(&self) -> NbsResult<Option<ManifestRecord>> {
        let path = self.dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(&self, record: &ManifestRecord) -> NbsResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, record)?;
        tmp.persist(self.dir.join(MANIFEST_FILE))
            .map_err(|e| NbsError::Io(e.error))?;
        Ok(())
    }
}

impl ManifestBackend for FileManifestBackend {
    fn fetch(&self) -> NbsResult<Option<ManifestRecord>> {
        self.read_record()
    }

    fn update(
        &self,
        expected: Option<&ManifestRecord>,
        new: &ManifestRecord,
    ) -> NbsResult<ManifestRecord> {
        let _lock = self.acquire_lock()?;
        let current = self.read_record()?;
        if !cas_matches_opt(current.as_ref(), expected) {
            return lost_cas(current);
        }
        self.write_record(new)?;
        Ok(new.clone())
    }
}

// ---------------------------------------------------------------------
// KV backend
// ---------------------------------------------------------------------

/// Manifest stored as a single KV item under a fixed key, updated with a
/// conditional put on the raw item bytes.
pub struct KvManifestBackend {
    kv: Arc<dyn KvTable>,
    key: String,
}

impl KvManifestBackend {
    pub fn new(kv: Arc<dyn KvTable>, db_name: impl Into<String>) -> Self {
        Self {
            kv,
            key: format!("manifest:{}", db_name.into()),
        }
    }

    fn fetch_raw(&self) -> NbsResult<Option<(Vec<u8>, ManifestRecord)>> {
        match self.kv.get_item(&self.key)? {
            Some(bytes) => {
                let record: ManifestRecord = serde_json::from_slice(&bytes)?;
                Ok(Some((bytes, record)))
            }
            None => Ok(None),
        }
    }
}

impl ManifestBackend for KvManifestBackend {
    fn fetch(&self) -> NbsResult<Option<ManifestRecord>> {
        Ok(self.fetch_raw()?.map(|(_, record)| record))
    }

    fn update(
        &self,
        expected: Option<&ManifestRecord>,
        new: &ManifestRecord,
    ) -> NbsResult<ManifestRecord> {
        let (current_bytes, current_record) = match self.fetch_raw()? {
            Some((bytes, record)) => (Some(bytes), Some(record)),
            None => (None, None),
        };
        if !cas_matches_opt(current_record.as_ref(), expected) {
            return lost_cas(current_record);
        }

        let new_bytes = serde_json::to_vec(new)?;
        let swapped = self
            .kv
            .put_item_if(&self.key, new_bytes, current_bytes.as_deref())?;
        if swapped {
            Ok(new.clone())
        } else {
            // Raced between fetch and put: hand back whatever won.
            lost_cas(self.fetch_raw()?.map(|(_, record)| record))
        }
    }
}
