//! Virtual File Store - opaque binary objects over a persistent key-value substrate
//!
//! Objects are addressed by URL-shaped keys: `file://<store_name>/<path>`.
//! The substrate is SQLite-backed on disk:
//! - kv_items(store, key, value)

pub mod schema;
pub mod substrate;
pub mod store;

pub use substrate::{KvSubstrate, MemorySubstrate, SqliteSubstrate};
pub use store::{FileBlob, VirtualFileStore, PROTOCOL};
