//! Content-defined chunk boundary detection.
//!
//! [`RollingHasher`] maintains a buzhash fingerprint over a fixed-width
//! sliding window of the input stream, updating in O(1) per byte. A chunk
//! boundary is declared when the low `pattern_bits` bits of the
//! fingerprint are all ones, which yields an average chunk size of
//! `2^pattern_bits` bytes. Because the fingerprint depends only on the
//! window contents, boundary positions are a pure function of the input
//! bytes: two streams with a shared region discover the same boundaries
//! inside it once a full window has been consumed.

/// Chunking parameters. Per-store configuration, never process-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Sliding window width in bytes.
    pub window: usize,
    /// Number of low fingerprint bits that must match for a boundary.
    /// The average chunk size is `2^pattern_bits` bytes.
    pub pattern_bits: u32,
}

impl ChunkConfig {
    /// Default parameters: 64-byte window, 12 pattern bits (~4 KiB chunks).
    pub const DEFAULT: Self = Self {
        window: 64,
        pattern_bits: 12,
    };

    fn pattern(&self) -> u64 {
        (1u64 << self.pattern_bits) - 1
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Windowed rolling fingerprint with boundary detection.
pub struct RollingHasher {
    window: Vec<u8>,
    pos: usize,
    filled: bool,
    hash: u64,
    pattern: u64,
    bytes_hashed: u64,
    crossed: bool,
}

impl RollingHasher {
    /// Create a hasher with the given parameters.
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            window: vec![0u8; config.window],
            pos: 0,
            filled: false,
            hash: 0,
            pattern: config.pattern(),
            bytes_hashed: 0,
            crossed: false,
        }
    }

    /// Consume one byte; returns `true` if a boundary fired after it.
    pub fn hash_byte(&mut self, b: u8) -> bool {
        let width = self.window.len();
        let outgoing = self.window[self.pos];
        self.window[self.pos] = b;
        self.pos += 1;
        if self.pos == width {
            self.pos = 0;
            self.filled = true;
        }

        self.hash = self.hash.rotate_left(1)
            ^ BYTE_TABLE[outgoing as usize].rotate_left(width as u32)
            ^ BYTE_TABLE[b as usize];
        self.bytes_hashed += 1;

        let boundary = self.filled && (self.hash & self.pattern) == self.pattern;
        self.crossed |= boundary;
        boundary
    }

    /// Consume a run of bytes; returns `true` if any boundary fired.
    pub fn hash_bytes(&mut self, bytes: &[u8]) -> bool {
        let mut any = false;
        for &b in bytes {
            any |= self.hash_byte(b);
        }
        any
    }

    /// Whether a boundary has fired since the last [`clear_crossed`].
    ///
    /// Item-granularity chunkers feed each serialized item through the
    /// hasher and cut after the item during which a boundary occurred.
    ///
    /// [`clear_crossed`]: RollingHasher::clear_crossed
    pub fn crossed_boundary(&self) -> bool {
        self.crossed
    }

    /// Reset the crossed-boundary flag.
    pub fn clear_crossed(&mut self) {
        self.crossed = false;
    }

    /// Total bytes consumed since construction.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }
}

/// Random-looking byte substitution table shared by every hasher.
///
/// Generated at compile time from a splitmix64 stream so the constants are
/// identical on every platform and in every build.
const BYTE_TABLE: [u64; 256] = build_byte_table();

const fn build_byte_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state: u64 = 0x9f2e_c0de_5eed_b10c;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}
