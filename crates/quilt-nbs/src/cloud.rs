//! Seams for the cloud persisters.
//!
//! [`ObjectStorage`] models an S3-class object store: whole-object puts,
//! ranged gets, and multipart uploads with server-side part copies.
//! [`KvTable`] models a DynamoDB-class key-value table: small items with
//! conditional writes. The in-memory implementations carry the same
//! semantics (including multipart abort and conditional-put behavior) and
//! support transient-failure injection for retry tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::{NbsError, NbsResult};

/// S3-class bulk object store.
pub trait ObjectStorage: Send + Sync {
    /// Store a whole object.
    fn put(&self, key: &str, data: Vec<u8>) -> NbsResult<()>;

    /// Read `len` bytes at `offset`.
    fn read_range(&self, key: &str, offset: u64, len: usize) -> NbsResult<Vec<u8>>;

    /// Size of an object in bytes.
    fn size(&self, key: &str) -> NbsResult<u64>;

    /// Begin a multipart upload; returns an upload id.
    fn create_multipart(&self, key: &str) -> NbsResult<String>;

    /// Upload one part. Part numbers start at 1 and determine assembly
    /// order.
    fn upload_part(&self, upload: &str, part: u32, data: Vec<u8>) -> NbsResult<()>;

    /// Copy a byte range of an existing object in as a part, without the
    /// bytes round-tripping through the client.
    fn upload_part_copy(
        &self,
        upload: &str,
        part: u32,
        src: &str,
        offset: u64,
        len: u64,
    ) -> NbsResult<()>;

    /// Assemble the uploaded parts into the final object.
    fn complete_multipart(&self, upload: &str) -> NbsResult<()>;

    /// Abandon an upload, discarding its parts.
    fn abort_multipart(&self, upload: &str) -> NbsResult<()>;
}

/// DynamoDB-class key-value table for small items.
pub trait KvTable: Send + Sync {
    fn get_item(&self, key: &str) -> NbsResult<Option<Vec<u8>>>;

    fn put_item(&self, key: &str, data: Vec<u8>) -> NbsResult<()>;

    /// Conditional put: succeeds iff the stored item currently equals
    /// `expected` (`None` = item must be absent). Returns whether the
    /// write happened.
    fn put_item_if(&self, key: &str, data: Vec<u8>, expected: Option<&[u8]>) -> NbsResult<bool>;
}

// ---------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// In-memory [`ObjectStorage`] with multipart semantics and transient
/// failure injection.
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    next_upload: AtomicU64,
    fail_next: AtomicU32,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            uploads: RwLock::new(HashMap::new()),
            next_upload: AtomicU64::new(1),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the next `n` writes (puts and part uploads) fail with a
    /// transient error.
    pub fn inject_transient_failures(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Number of uploads started but neither completed nor aborted.
    pub fn pending_upload_count(&self) -> usize {
        self.uploads.read().expect("lock poisoned").len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(key)
    }

    fn check_injected_failure(&self) -> NbsResult<()> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if remaining {
            Err(NbsError::Transient("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStorage for MemoryObjectStorage {
    fn put(&self, key: &str, data: Vec<u8>) -> NbsResult<()> {
        self.check_injected_failure()?;
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), data);
        Ok(())
    }

    fn read_range(&self, key: &str, offset: u64, len: usize) -> NbsResult<Vec<u8>> {
        let objects = self.objects.read().expect("lock poisoned");
        let data = objects
            .get(key)
            .ok_or_else(|| NbsError::Backend(format!("no such object: {key}")))?;
        let start = offset as usize;
        let end = start + len;
        if end > data.len() {
            return Err(NbsError::Backend(format!(
                "range {len}@{offset} past end of {key} ({} bytes)",
                data.len()
            )));
        }
        Ok(data[start..end].to_vec())
    }

    fn size(&self, key: &str) -> NbsResult<u64> {
        let objects = self.objects.read().expect("lock poisoned");
        objects
            .get(key)
            .map(|d| d.len() as u64)
            .ok_or_else(|| NbsError::Backend(format!("no such object: {key}")))
    }

    fn create_multipart(&self, key: &str) -> NbsResult<String> {
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.write().expect("lock poisoned").insert(
            id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn upload_part(&self, upload: &str, part: u32, data: Vec<u8>) -> NbsResult<()> {
        self.check_injected_failure()?;
        let mut uploads = self.uploads.write().expect("lock poisoned");
        let pending = uploads
            .get_mut(upload)
            .ok_or_else(|| NbsError::Backend(format!("no such upload: {upload}")))?;
        pending.parts.insert(part, data);
        Ok(())
    }

    fn upload_part_copy(
        &self,
        upload: &str,
        part: u32,
        src: &str,
        offset: u64,
        len: u64,
    ) -> NbsResult<()> {
        let data = self.read_range(src, offset, len as usize)?;
        let mut uploads = self.uploads.write().expect("lock poisoned");
        let pending = uploads
            .get_mut(upload)
            .ok_or_else(|| NbsError::Backend(format!("no such upload: {upload}")))?;
        pending.parts.insert(part, data);
        Ok(())
    }

    fn complete_multipart(&self, upload: &str) -> NbsResult<()> {
        let pending = self
            .uploads
            .write()
            .expect("lock poisoned")
            .remove(upload)
            .ok_or_else(|| NbsError::Backend(format!("no such upload: {upload}")))?;
        let assembled: Vec<u8> = pending
            .parts
            .into_values()
            .flatten()
            .collect();
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(pending.key, assembled);
        Ok(())
    }

    fn abort_multipart(&self, upload: &str) -> NbsResult<()> {
        self.uploads.write().expect("lock poisoned").remove(upload);
        Ok(())
    }
}

/// In-memory [`KvTable`] with conditional-put semantics and transient
/// failure injection.
pub struct MemoryKvTable {
    items: RwLock<HashMap<String, Vec<u8>>>,
    fail_next: AtomicU32,
}

impl MemoryKvTable {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the next `n` writes fail with a transient error.
    pub fn inject_transient_failures(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn item_count(&self) -> usize {
        self.items.read().expect("lock poisoned").len()
    }

    fn check_injected_failure(&self) -> NbsResult<()> {
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if remaining {
            Err(NbsError::Transient("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryKvTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KvTable for MemoryKvTable {
    fn get_item(&self, key: &str) -> NbsResult<Option<Vec<u8>>> {
        Ok(self.items.read().expect("lock poisoned").get(key).cloned())
    }

    fn put_item(&self, key: &str, data: Vec<u8>) -> NbsResult<()> {
        self.check_injected_failure()?;
        self.items
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), data);
        Ok(())
    }

    fn put_item_if(&self, key: &str, data: Vec<u8>, expected: Option<&[u8]>) -> NbsResult<bool> {
        self.check_injected_failure()?;
        let mut items = self.items.write().expect("lock poisoned");
        let current = items.get(key).map(|v| v.as_slice());
        if current != expected {
            return Ok(false);
        }
        items.insert(key.to_string(), data);
        Ok(true)
    }
}
