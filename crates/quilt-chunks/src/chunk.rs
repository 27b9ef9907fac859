use quilt_hash::Address;

/// An immutable byte payload identified by its content address.
///
/// The address is computed once at construction and equals
/// `Address::of(payload)` for every chunk except the empty chunk, which
/// uses the all-zeros sentinel address.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    data: Vec<u8>,
}

impl Chunk {
    /// Create a chunk from a payload, computing its address.
    pub fn new(data: Vec<u8>) -> Self {
        let address = if data.is_empty() {
            Address::EMPTY
        } else {
            Address::of(&data)
        };
        Self { address, data }
    }

    /// Reassemble a chunk from a known address and payload, e.g. when
    /// reading out of a table whose index already carries the address.
    /// The caller is responsible for having verified the pairing.
    pub fn from_parts(address: Address, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// The empty chunk: zero-length payload, sentinel address.
    pub fn empty() -> Self {
        Self {
            address: Address::EMPTY,
            data: Vec::new(),
        }
    }

    /// Returns `true` for the empty chunk.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Consume the chunk, returning its payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Re-verify that the payload hashes to the address.
    pub fn verify(&self) -> bool {
        if self.data.is_empty() {
            self.address.is_empty()
        } else {
            Address::of(&self.data) == self.address
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("len", &self.data.len())
            .finish()
    }
}
