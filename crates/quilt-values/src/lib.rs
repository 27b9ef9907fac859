//! The Quilt value layer.
//!
//! Values are immutable and content-addressed: every value has a
//! canonical tagged binary encoding, and its address is the hash of that
//! encoding. Small values are inline; collections (Blob, List, Map, Set)
//! decompose into trees of chunks whose boundaries are chosen by a
//! rolling hash over the serialized items, so tree shape is a pure
//! function of content and equal collections share chunks.
//!
//! The crate provides:
//! - the [`Value`] enum and its typed constructors,
//! - the [codec] implementing the wire encoding,
//! - [types] describing values (with recursive types closed by `Cycle`),
//! - prolly-tree machinery: [chunker], [cursor], [sequence],
//! - ordered-collection diffing ([seqdiff]) and list splicing ([splice]),
//! - structural [path] addressing.

pub mod blob;
pub mod chunker;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod kind;
pub mod list;
pub mod map;
pub mod number;
pub mod path;
pub mod refs;
pub mod seqdiff;
pub mod sequence;
pub mod set;
pub mod splice;
pub mod store;
pub mod structs;
pub mod types;
pub mod value;

pub use blob::Blob;
pub use error::{ValueError, ValueResult};
pub use kind::Kind;
pub use list::List;
pub use map::Map;
pub use path::{Path, PathPart};
pub use refs::Ref;
pub use seqdiff::{ChangeKind, DiffMode, KeyedChange};
pub use sequence::{MapEntry, MetaTuple, OrderKey, Sequence, SequenceData};
pub use set::Set;
pub use splice::{calc_splices, Splice};
pub use store::{MemValueStore, ValueReader, ValueStore, ValueWriter};
pub use structs::Struct;
pub use types::Type;
pub use value::Value;
