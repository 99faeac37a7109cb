//! Engine Layer - embedded DuckDB bound to the remote channel and the local settings
//!
//! Objects inside the engine:
//! - channel: read-only view over the remote parquet dataset
//! - settings(key, value): read-write table persisted through the virtual file store

pub mod handle;
pub mod schema;
pub mod query;

pub use handle::{DataProtocol, EngineBundle, EngineConnection, EngineHandle};
pub use query::QueryEngine;
