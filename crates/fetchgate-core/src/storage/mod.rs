//! Storage layer
//!
//! Durable key-value storage used to keep credentials across restarts.
//! Nothing else in the coordinator is persisted: cached query results live
//! only in memory.

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
