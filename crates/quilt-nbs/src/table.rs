//! The on-disk chunk table format.
//!
//! A table is an immutable, content-addressed bundle of chunks:
//!
//! ```text
//! [data:   concatenated chunk payloads, in write order]
//! [index:  N x {prefix: u64 BE, ordinal: u32 BE}   sorted by address
//!          N x length: u32 BE
//!          N x suffix: [u8; 12]]
//! [footer: chunkCount: u32 BE
//!          totalUncompLen: u64 BE
//!          magic: b"NBSv1   "]
//! ```
//!
//! Index entries are sorted by the 8-byte address prefix, with the
//! 12-byte suffix resolving collisions; `ordinal` is the chunk's position
//! in write order, which ties it to its payload offset. A table's name is
//! the hash of its member addresses concatenated in sorted order, so
//! tables are themselves content-addressed.

use byteorder::{BigEndian, ByteOrder};

use quilt_hash::{Address, ADDRESS_LEN, PREFIX_LEN, SUFFIX_LEN};

use crate::error::{NbsError, NbsResult};

/// Magic trailer identifying table format v1.
pub const MAGIC: &[u8; 8] = b"NBSv1   ";

/// Bytes per index entry: prefix tuple (8 + 4), length (4), suffix (12).
pub const INDEX_ENTRY_SIZE: usize = PREFIX_LEN + 4 + 4 + SUFFIX_LEN;

/// Footer size: chunk count (4) + total uncompressed length (8) + magic (8).
pub const FOOTER_SIZE: usize = 4 + 8 + 8;

/// Upper bound on the size of a table holding `count` chunks totalling
/// `total_data` payload bytes. Callers size write buffers with this.
pub fn max_table_size(count: u64, total_data: u64) -> u64 {
    total_data + count * INDEX_ENTRY_SIZE as u64 + FOOTER_SIZE as u64
}

/// Parsed table index: the sorted lookup arrays plus the per-ordinal
/// offsets reconstructed from them.
#[derive(Clone, Debug)]
pub struct TableIndex {
    prefixes: Vec<u64>,
    ordinals: Vec<u32>,
    lengths: Vec<u32>,
    suffixes: Vec<[u8; SUFFIX_LEN]>,
    offsets_by_ordinal: Vec<u64>,
    lengths_by_ordinal: Vec<u32>,
    total_data: u64,
}

impl TableIndex {
    /// Parse an index block of `chunk_count` entries.
    pub fn parse(block: &[u8], chunk_count: u32, total_data: u64) -> NbsResult<Self> {
        let n = chunk_count as usize;
        if block.len() != n * INDEX_ENTRY_SIZE {
            return Err(NbsError::Corrupt(format!(
                "index block is {} bytes, want {} for {} chunks",
                block.len(),
                n * INDEX_ENTRY_SIZE,
                n
            )));
        }

        let mut prefixes = Vec::with_capacity(n);
        let mut ordinals = Vec::with_capacity(n);
        let mut pos = 0;
        for _ in 0..n {
            prefixes.push(BigEndian::read_u64(&block[pos..]));
            ordinals.push(BigEndian::read_u32(&block[pos + 8..]));
            pos += PREFIX_LEN + 4;
        }

        let mut lengths = Vec::with_capacity(n);
        for _ in 0..n {
            lengths.push(BigEndian::read_u32(&block[pos..]));
            pos += 4;
        }

        let mut suffixes = Vec::with_capacity(n);
        for _ in 0..n {
            let mut suffix = [0u8; SUFFIX_LEN];
            suffix.copy_from_slice(&block[pos..pos + SUFFIX_LEN]);
            suffixes.push(suffix);
            pos += SUFFIX_LEN;
        }

        // Reconstruct data offsets: chunk payloads lie in ordinal (write)
        // order, so offsets are the prefix sums of lengths by ordinal.
        let mut lengths_by_ordinal = vec![0u32; n];
        for (i, &ordinal) in ordinals.iter().enumerate() {
            let slot = ordinal as usize;
            if slot >= n {
                return Err(NbsError::Corrupt(format!(
                    "ordinal {ordinal} out of range for {n} chunks"
                )));
            }
            lengths_by_ordinal[slot] = lengths[i];
        }
        let mut offsets_by_ordinal = Vec::with_capacity(n);
        let mut offset = 0u64;
        for &len in &lengths_by_ordinal {
            offsets_by_ordinal.push(offset);
            offset += len as u64;
        }
        if offset != total_data {
            return Err(NbsError::Corrupt(format!(
                "chunk lengths sum to {offset}, footer says {total_data}"
            )));
        }

        Ok(Self {
            prefixes,
            ordinals,
            lengths,
            suffixes,
            offsets_by_ordinal,
            lengths_by_ordinal,
            total_data,
        })
    }

    /// Number of chunks in the table.
    pub fn chunk_count(&self) -> u32 {
        self.prefixes.len() as u32
    }

    /// Length of the data region in bytes.
    pub fn total_data(&self) -> u64 {
        self.total_data
    }

    /// Find a chunk by address: binary search on the prefix, then walk
    /// the equal-prefix run comparing suffixes.
    /// Returns `(data offset, payload length)`.
    pub fn lookup(&self, address: &Address) -> Option<(u64, u32)> {
        let run = self.prefix_run(address.prefix())?;
        for i in run {
            if self.suffixes[i] == address.suffix() {
                let ordinal = self.ordinals[i] as usize;
                return Some((self.offsets_by_ordinal[ordinal], self.lengths_by_ordinal[ordinal]));
            }
        }
        None
    }

    /// Indices of the sorted entries whose prefix equals `prefix`.
    pub fn prefix_run(&self, prefix: u64) -> Option<std::ops::Range<usize>> {
        let start = self.prefixes.partition_point(|&p| p < prefix);
        if start == self.prefixes.len() || self.prefixes[start] != prefix {
            return None;
        }
        let end = self.prefixes.partition_point(|&p| p <= prefix);
        Some(start..end)
    }

    /// The full address of the sorted entry `i`, rebuilt from its prefix
    /// and suffix.
    pub fn address_at(&self, i: usize) -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        BigEndian::write_u64(&mut bytes[..PREFIX_LEN], self.prefixes[i]);
        bytes[PREFIX_LEN..].copy_from_slice(&self.suffixes[i]);
        Address::from_bytes(bytes)
    }

    /// `(offset, length)` of the sorted entry `i`.
    pub fn location_at(&self, i: usize) -> (u64, u32) {
        let ordinal = self.ordinals[i] as usize;
        (self.offsets_by_ordinal[ordinal], self.lengths_by_ordinal[ordinal])
    }

    /// Prefix of the sorted entry `i`.
    pub fn prefix_at(&self, i: usize) -> u64 {
        self.prefixes[i]
    }

    /// All `(address, length)` pairs in ordinal (payload layout) order,
    /// as needed to re-lay the data region during conjoin.
    pub fn entries_by_ordinal(&self) -> Vec<(Address, u32)> {
        let n = self.prefixes.len();
        let mut out = vec![(Address::EMPTY, 0u32); n];
        for i in 0..n {
            out[self.ordinals[i] as usize] = (self.address_at(i), self.lengths[i]);
        }
        out
    }
}

/// Serialize the index + footer for chunks laid out in `entries` order,
/// and compute the table name.
pub fn build_index_and_footer(entries: &[(Address, u32)]) -> (Vec<u8>, Address) {
    let n = entries.len();

    // Sort by full address; prefix order with suffix tiebreak is exactly
    // lexicographic address order.
    let mut sorted: Vec<usize> = (0..n).collect();
    sorted.sort_by(|&a, &b| entries[a].0.cmp(&entries[b].0));

    let mut buf = Vec::with_capacity(n * INDEX_ENTRY_SIZE + FOOTER_SIZE);
    let mut scratch = [0u8; 8];
    for &i in &sorted {
        BigEndian::write_u64(&mut scratch, entries[i].0.prefix());
        buf.extend_from_slice(&scratch);
        BigEndian::write_u32(&mut scratch[..4], i as u32);
        buf.extend_from_slice(&scratch[..4]);
    }
    for &i in &sorted {
        BigEndian::write_u32(&mut scratch[..4], entries[i].1);
        buf.extend_from_slice(&scratch[..4]);
    }
    for &i in &sorted {
        buf.extend_from_slice(entries[i].0.suffix());
    }

    let total_data: u64 = entries.iter().map(|&(_, len)| len as u64).sum();
    BigEndian::write_u32(&mut scratch[..4], n as u32);
    buf.extend_from_slice(&scratch[..4]);
    BigEndian::write_u64(&mut scratch, total_data);
    buf.extend_from_slice(&scratch);
    buf.extend_from_slice(MAGIC);

    let mut name_material = Vec::with_capacity(n * ADDRESS_LEN);
    for &i in &sorted {
        name_material.extend_from_slice(entries[i].0.as_bytes());
    }
    (buf, Address::of(&name_material))
}

/// Parse the footer of a complete table image, returning
/// `(chunk_count, total_data)`.
pub fn parse_footer(footer: &[u8]) -> NbsResult<(u32, u64)> {
    if footer.len() != FOOTER_SIZE {
        return Err(NbsError::Corrupt(format!(
            "footer is {} bytes, want {FOOTER_SIZE}",
            footer.len()
        )));
    }
    if &footer[12..] != MAGIC {
        return Err(NbsError::Corrupt("bad table magic".into()));
    }
    let chunk_count = BigEndian::read_u32(&footer[..4]);
    let total_data = BigEndian::read_u64(&footer[4..12]);
    Ok((chunk_count, total_data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &[u8]) -> (Address, u32) {
        (Address::of(data), data.len() as u32)
    }

    #[test]
    fn max_table_size_covers_index_and_footer() {
        assert_eq!(max_table_size(0, 0), FOOTER_SIZE as u64);
        assert_eq!(
            max_table_size(3, 100),
            100 + 3 * INDEX_ENTRY_SIZE as u64 + FOOTER_SIZE as u64
        );
    }

    #[test]
    fn index_roundtrip_preserves_lookup() {
        let entries = vec![entry(b"aaa"), entry(b"bb"), entry(b"cccc")];
        let (buf, _) = build_index_and_footer(&entries);
        let index_block = &buf[..buf.len() - FOOTER_SIZE];
        let (count, total) = parse_footer(&buf[buf.len() - FOOTER_SIZE..]).unwrap();
        assert_eq!(count, 3);
        assert_eq!(total, 9);

        let index = TableIndex::parse(index_block, count, total).unwrap();
        // Chunks were laid out in entries order, so offsets follow it.
        assert_eq!(index.lookup(&entries[0].0), Some((0, 3)));
        assert_eq!(index.lookup(&entries[1].0), Some((3, 2)));
        assert_eq!(index.lookup(&entries[2].0), Some((5, 4)));
        assert_eq!(index.lookup(&Address::of(b"absent")), None);
    }

    #[test]
    fn entries_by_ordinal_recovers_layout_order() {
        let entries = vec![entry(b"one"), entry(b"two"), entry(b"three")];
        let (buf, _) = build_index_and_footer(&entries);
        let index = TableIndex::parse(
            &buf[..buf.len() - FOOTER_SIZE],
            3,
            11,
        )
        .unwrap();
        assert_eq!(index.entries_by_ordinal(), entries);
    }

    #[test]
    fn name_depends_only_on_member_addresses() {
        let a = entry(b"first");
        let b = entry(b"second");
        let (_, name_ab) = build_index_and_footer(&[a, b]);
        let (_, name_ba) = build_index_and_footer(&[b, a]);
        // Name hashes addresses in sorted order, so layout order is
        // irrelevant.
        assert_eq!(name_ab, name_ba);

        let (_, name_other) = build_index_and_footer(&[a]);
        assert_ne!(name_ab, name_other);
    }

    #[test]
    fn parse_footer_rejects_bad_magic() {
        let mut footer = vec![0u8; FOOTER_SIZE];
        footer[12..].copy_from_slice(b"NOTMAGIC");
        assert!(matches!(
            parse_footer(&footer),
            Err(NbsError::Corrupt(_))
        ));
    }

    #[test]
    fn parse_rejects_truncated_index() {
        let err = TableIndex::parse(&[0u8; 10], 1, 0).unwrap_err();
        assert!(matches!(err, NbsError::Corrupt(_)));
    }

    #[test]
    fn parse_rejects_length_sum_mismatch() {
        let entries = vec![entry(b"data")];
        let (buf, _) = build_index_and_footer(&entries);
        let err =
            TableIndex::parse(&buf[..buf.len() - FOOTER_SIZE], 1, 9999).unwrap_err();
        assert!(matches!(err, NbsError::Corrupt(_)));
    }

    #[test]
    fn prefix_run_spans_collisions() {
        // Two synthetic addresses sharing a prefix but not a suffix.
        let mut b1 = [0u8; ADDRESS_LEN];
        let mut b2 = [0u8; ADDRESS_LEN];
        b1[7] = 9;
        b2[7] = 9;
        b1[19] = 1;
        b2[19] = 2;
        let entries = vec![(Address::from_bytes(b1), 4u32), (Address::from_bytes(b2), 6u32)];
        let (buf, _) = build_index_and_footer(&entries);
        let index =
            TableIndex::parse(&buf[..buf.len() - FOOTER_SIZE], 2, 10).unwrap();

        let run = index.prefix_run(9).unwrap();
        assert_eq!(run.len(), 2);
        assert_eq!(index.lookup(&entries[0].0), Some((0, 4)));
        assert_eq!(index.lookup(&entries[1].0), Some((4, 6)));
    }
}
