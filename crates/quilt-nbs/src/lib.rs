//! The Quilt block store: append-only tables of content-addressed chunks.
//!
//! Writers accumulate chunks in a byte-budgeted [`MemTable`]; full
//! memtables are persisted as immutable [table files](table) whose index
//! supports binary search by address prefix. A [`BlockStore`] aggregates
//! the memtable with an ordered set of tables, answering reads
//! newest-to-oldest, and serializes all root updates through a
//! compare-and-set on the externally stored [manifest]. Background
//! compaction ([conjoin]) keeps the table count bounded.
//!
//! Persistence targets are pluggable: a local directory
//! ([`FilePersister`]), an S3-class object store ([`ObjectPersister`],
//! multipart uploads and server-side copies), or a DynamoDB-class
//! key-value table for small tables ([`KvPersister`]).

pub mod cloud;
pub mod conjoin;
pub mod error;
pub mod file;
pub mod kv;
pub mod manifest;
pub mod memtable;
pub mod object;
pub mod persist;
pub mod reader;
pub mod stats;
pub mod store;
pub mod table;
pub mod writer;

pub use cloud::{KvTable, MemoryKvTable, MemoryObjectStorage, ObjectStorage};
pub use error::{NbsError, NbsResult};
pub use file::FilePersister;
pub use kv::KvPersister;
pub use manifest::{FileManifestBackend, KvManifestBackend, ManifestBackend, ManifestRecord, TableSpec};
pub use memtable::MemTable;
pub use object::{ObjectPersister, PartLimits};
pub use persist::{ChunkSource, TablePersister, TableSet};
pub use reader::{AddressRecord, TableReader};
pub use stats::Stats;
pub use store::{file_block_store, BlockStore, StoreConfig};
pub use writer::TableWriter;
