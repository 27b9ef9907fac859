use quilt_chunks::{Chunk, ChunkStore, MemoryChunkStore};
use quilt_hash::Address;

use crate::codec;
use crate::error::{ValueError, ValueResult};
use crate::refs::Ref;
use crate::value::Value;

/// Reads values out of chunk storage.
pub trait ValueReader {
    /// Decode the value stored at `address`.
    fn read_value(&self, address: &Address) -> ValueResult<Value>;
}

/// Writes values into chunk storage.
pub trait ValueWriter {
    /// Encode `value` into a chunk, store it, and return a ref carrying
    /// the value's derived type and height.
    fn write_value(&self, value: &Value) -> ValueResult<Ref>;
}

/// Both halves together; collection builders take this.
pub trait ValueStore: ValueReader + ValueWriter {}
impl<T: ValueReader + ValueWriter> ValueStore for T {}

/// Shared encode-chunk-put implementation for any [`ChunkStore`].
pub fn write_value_to(store: &dyn ChunkStore, value: &Value) -> ValueResult<Ref> {
    let encoded = value.encode();
    let chunk = Chunk::new(encoded);
    let address = chunk.address();
    store.put(chunk)?;
    Ok(Ref::from_parts(
        address,
        value.type_of(),
        1 + value.max_ref_height(),
    ))
}

/// Shared get-and-decode implementation for any [`ChunkStore`].
pub fn read_value_from(store: &dyn ChunkStore, address: &Address) -> ValueResult<Value> {
    let chunk = store.get(address)?;
    if chunk.is_empty() {
        return Err(ValueError::NotFound(*address));
    }
    codec::decode_value(chunk.data())
}

/// Value store over an in-memory chunk store. The workhorse for tests
/// and short-lived embedded use.
pub struct MemValueStore {
    chunks: MemoryChunkStore,
}

impl MemValueStore {
    pub fn new() -> Self {
        Self {
            chunks: MemoryChunkStore::new(),
        }
    }

    pub fn chunk_store(&self) -> &MemoryChunkStore {
        &self.chunks
    }

    /// Number of distinct chunks written, counting uncommitted ones.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len() + self.chunks.pending_len()
    }
}

impl Default for MemValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueReader for MemValueStore {
    fn read_value(&self, address: &Address) -> ValueResult<Value> {
        read_value_from(&self.chunks, address)
    }
}

impl ValueWriter for MemValueStore {
    fn write_value(&self, value: &Value) -> ValueResult<Ref> {
        write_value_to(&self.chunks, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let store = MemValueStore::new();
        let v = Value::String("stored".into());
        let r = store.write_value(&v).unwrap();
        assert_eq!(r.address(), v.address());
        assert_eq!(store.read_value(&r.address()).unwrap(), v);
    }

    #[test]
    fn read_of_absent_address_is_not_found() {
        let store = MemValueStore::new();
        let missing = Address::of(b"missing");
        assert!(matches!(
            store.read_value(&missing),
            Err(ValueError::NotFound(_))
        ));
    }

    #[test]
    fn write_is_idempotent_by_content() {
        let store = MemValueStore::new();
        let v = Value::Number(5.0);
        let r1 = store.write_value(&v).unwrap();
        let r2 = store.write_value(&v).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.chunk_count(), 1);
    }

    #[test]
    fn written_ref_carries_type_and_height() {
        let store = MemValueStore::new();
        let inner = store.write_value(&Value::Bool(true)).unwrap();
        let outer = store.write_value(&Value::Ref(inner.clone())).unwrap();
        assert_eq!(inner.height(), 1);
        assert_eq!(outer.height(), 2);
    }
}
