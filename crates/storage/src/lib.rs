//! Durable storage: the content-addressed object store interface with its
//! disk and in-memory backends, and the typed DAO layer the rest of the node
//! reads and writes through.
//!
//! Writers are partitioned by key prefix: `BLOCK/`, `TRANSACTION/`,
//! `BROADCAST/`, `TRANSACTION_TYPES/`, `KEYS/`, `INTERCHAINS/`.

pub mod dao;
pub mod disk;
pub mod index;
pub mod memory;
pub mod object_store;

pub use disk::DiskStore;
pub use index::{BlockIndexer, MemoryIndexer};
pub use memory::MemoryStore;
pub use object_store::{get_json_object, put_object_as_json, ObjectStore};
