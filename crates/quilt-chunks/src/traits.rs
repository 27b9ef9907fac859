use quilt_hash::Address;

use crate::chunk::Chunk;
use crate::error::ChunkResult;

/// Destination for batched chunk reads. Delivery order is unspecified;
/// callers that need ordering reassemble by address.
pub type ChunkSink = crossbeam_channel::Sender<Chunk>;

/// A content-addressed chunk store.
///
/// All implementations must satisfy these invariants:
/// - Chunks are immutable once written; their address equals the hash of
///   their payload.
/// - A chunk referenced (directly or transitively) by the current root
///   must be retrievable.
/// - `put` happens-before `commit`: a successful commit implies every
///   chunk put before it is durable.
/// - Two concurrent `commit`s serialize through the root compare-and-set;
///   the loser's local state is untouched and it is told to rebase.
pub trait ChunkStore: Send + Sync {
    /// Read a chunk by address. Returns the empty chunk if absent.
    fn get(&self, address: &Address) -> ChunkResult<Chunk>;

    /// Read a batch of chunks, delivering each found chunk to `sink`.
    /// Chunks may arrive in any order. Addresses with no chunk in the
    /// store are silently skipped; use [`has_many`] to detect absence.
    ///
    /// [`has_many`]: ChunkStore::has_many
    fn get_many(&self, addresses: &[Address], sink: &ChunkSink) -> ChunkResult<()> {
        for address in addresses {
            let chunk = self.get(address)?;
            if !chunk.is_empty() {
                let _ = sink.send(chunk);
            }
        }
        Ok(())
    }

    /// Whether a chunk with this address is present.
    fn has(&self, address: &Address) -> ChunkResult<bool>;

    /// Batch presence check; result is parallel to `addresses`.
    fn has_many(&self, addresses: &[Address]) -> ChunkResult<Vec<bool>> {
        addresses.iter().map(|a| self.has(a)).collect()
    }

    /// Buffer a chunk for storage. Durability is only guaranteed after a
    /// successful [`commit`].
    ///
    /// [`commit`]: ChunkStore::commit
    fn put(&self, chunk: Chunk) -> ChunkResult<()>;

    /// The current root address. The empty address means the store has
    /// never been committed to.
    fn root(&self) -> ChunkResult<Address>;

    /// Atomically update the root from `expected` to `new`, flushing
    /// buffered chunks first.
    ///
    /// Returns `true` on success. Returns `false` if the stored root no
    /// longer equals `expected`; the local view has then been rebased
    /// onto the current state and the caller may retry.
    fn commit(&self, new: Address, expected: Address) -> ChunkResult<bool>;

    /// Re-read the externally stored state, picking up tables and a root
    /// committed by other views.
    fn rebase(&self) -> ChunkResult<()>;

    /// Human-readable operational counters.
    fn stats_summary(&self) -> String {
        String::from("(no stats)")
    }
}
