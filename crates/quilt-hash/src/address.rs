use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32HEX_NOPAD;
use sha2::{Digest, Sha512};

use crate::error::HashError;

/// Byte length of an [`Address`].
pub const ADDRESS_LEN: usize = 20;

/// Byte length of the prefix used for index lookup.
pub const PREFIX_LEN: usize = 8;

/// Byte length of the suffix that disambiguates prefix collisions.
pub const SUFFIX_LEN: usize = ADDRESS_LEN - PREFIX_LEN;

/// Content address of a chunk: the first 20 bytes of the SHA-512 of its
/// payload.
///
/// Identical payloads always produce the same `Address`, making chunks
/// deduplicatable and verifiable. Addresses order lexicographically by
/// byte comparison. The textual form is 32 characters of lower-case
/// base32hex (alphabet `0123456789abcdefghijklmnopqrstuv`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// The empty address (all zeros). Names the empty chunk and the root
    /// of a database that has never been committed to.
    pub const EMPTY: Self = Self([0u8; ADDRESS_LEN]);

    /// Compute the address of a byte payload.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha512::digest(data);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(bytes)
    }

    /// Construct from raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Construct from a byte slice, checking the length.
    pub fn from_slice(data: &[u8]) -> Result<Self, HashError> {
        if data.len() != ADDRESS_LEN {
            return Err(HashError::InvalidLength {
                expected: ADDRESS_LEN,
                actual: data.len(),
            });
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(data);
        Ok(Self(bytes))
    }

    /// Returns `true` if this is the empty address.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// The raw 20-byte address.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// The first 8 bytes as a big-endian unsigned integer, used for
    /// table index lookup.
    pub fn prefix(&self) -> u64 {
        let mut buf = [0u8; PREFIX_LEN];
        buf.copy_from_slice(&self.0[..PREFIX_LEN]);
        u64::from_be_bytes(buf)
    }

    /// The low 12 bytes, used to resolve prefix collisions in table
    /// indexes.
    pub fn suffix(&self) -> &[u8] {
        &self.0[PREFIX_LEN..]
    }

    /// Short textual form (first 8 characters of the base32 spelling).
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 160 bits is exactly 32 base32 digits, so no padding is involved.
        let mut spelled = BASE32HEX_NOPAD.encode(&self.0);
        spelled.make_ascii_lowercase();
        f.write_str(&spelled)
    }
}

impl FromStr for Address {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: s.len(),
            });
        }
        let upper = s.to_ascii_uppercase();
        let bytes = BASE32HEX_NOPAD
            .decode(upper.as_bytes())
            .map_err(|e| HashError::InvalidEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<Address> for [u8; ADDRESS_LEN] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        let data = b"hello world";
        let a1 = Address::of(data);
        let a2 = Address::of(data);
        assert_eq!(a1, a2);
    }

    #[test]
    fn different_data_produces_different_addresses() {
        assert_ne!(Address::of(b"hello"), Address::of(b"world"));
    }

    #[test]
    fn empty_is_all_zeros() {
        let empty = Address::EMPTY;
        assert!(empty.is_empty());
        assert_eq!(empty.as_bytes(), &[0u8; ADDRESS_LEN]);
    }

    #[test]
    fn hash_of_empty_payload_is_not_the_empty_address() {
        // The empty chunk is named by the sentinel, not by hashing.
        assert!(!Address::of(b"").is_empty());
    }

    #[test]
    fn spelling_roundtrip() {
        let addr = Address::of(b"roundtrip");
        let spelled = addr.to_string();
        assert_eq!(spelled.len(), 32);
        let parsed: Address = spelled.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn spelling_uses_base32hex_alphabet() {
        let alphabet = "0123456789abcdefghijklmnopqrstuv";
        for _ in 0..4 {
            let spelled = Address::of(b"alphabet-check").to_string();
            assert!(spelled.chars().all(|c| alphabet.contains(c)));
        }
        assert_eq!(Address::EMPTY.to_string(), "0".repeat(32));
    }

    #[test]
    fn parse_rejects_bad_length() {
        let err = "short".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            HashError::InvalidLength {
                expected: 32,
                actual: 5
            }
        );
    }

    #[test]
    fn parse_rejects_bad_characters() {
        let bad = "z".repeat(32); // 'z' is outside the alphabet
        assert!(matches!(
            bad.parse::<Address>(),
            Err(HashError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn prefix_is_big_endian_first_eight_bytes() {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[..8].copy_from_slice(&[0, 0, 0, 0, 0, 0, 1, 2]);
        let addr = Address::from_bytes(bytes);
        assert_eq!(addr.prefix(), 0x0102);
    }

    #[test]
    fn suffix_is_low_twelve_bytes() {
        let addr = Address::of(b"suffix");
        assert_eq!(addr.suffix().len(), SUFFIX_LEN);
        assert_eq!(addr.suffix(), &addr.as_bytes()[8..]);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let lo = Address::from_bytes([0u8; ADDRESS_LEN]);
        let mut hi_bytes = [0u8; ADDRESS_LEN];
        hi_bytes[0] = 1;
        let hi = Address::from_bytes(hi_bytes);
        assert!(lo < hi);
    }

    #[test]
    fn serde_uses_textual_form() {
        let addr = Address::of(b"serde");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, parsed);
    }
}
