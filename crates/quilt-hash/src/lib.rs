//! Content addressing primitives for Quilt.
//!
//! Provides the 20-byte truncated-SHA-512 [`Address`] used to name every
//! chunk in the system, its base-32 textual spelling, and the
//! [`RollingHasher`] that detects content-defined chunk boundaries.
//!
//! Addressing and boundary detection are both pure functions of their
//! input bytes. Nothing in this crate touches I/O.

pub mod address;
pub mod error;
pub mod rolling;

pub use address::{Address, ADDRESS_LEN, PREFIX_LEN, SUFFIX_LEN};
pub use error::HashError;
pub use rolling::{ChunkConfig, RollingHasher};
