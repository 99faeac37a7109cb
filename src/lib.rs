//! # Feedparq - reader core for columnar content feeds
//!
//! A channel of syndicated entries arrives as a parquet object fetched over
//! HTTP. Feedparq provides:
//! - A virtual file store of opaque binary objects over a persistent key-value substrate
//! - An embedded analytical engine wrapper that binds the remote channel as a view
//!   and round-trips a local settings table through the virtual file store
//! - A typed settings store with an in-memory cache
//! - A streaming chat-completion client that decodes server-sent events

pub mod uri;
pub mod vfs;
pub mod engine;
pub mod channel;
pub mod settings;
pub mod llm;
pub mod app;
pub mod ui;
pub mod config;

// Re-exports for convenient access
pub use uri::SettingUrn;
pub use vfs::{FileBlob, VirtualFileStore};
pub use engine::{EngineHandle, QueryEngine};
pub use channel::FeedRow;
pub use settings::{LlmCreds, SettingsStore, ViewMode};
pub use llm::{CompletionClient, EventStream, StreamEvent};
pub use app::App;

/// Result type alias for Feedparq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Feedparq operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fs : unsupported address: {0}")]
    UnsupportedAddress(String),

    #[error("fs : invalid payload: {0}")]
    InvalidPayload(String),

    #[error("channel feed not found: {url} ({status})")]
    ChannelUnavailable { url: String, status: String },

    #[error("could not save settings: {0}")]
    SettingsPersistence(#[source] Box<Error>),

    #[error("settings : type of {key} is {found} but should be {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("settings : key should be urn format: {0}")]
    MalformedUrn(String),

    #[error("completion request failed ({status}): {body}")]
    RequestFailed { status: u16, body: String },

    #[error("no stream in completion response")]
    NoStreamBody,

    #[error("stream decode error: {0}")]
    StreamDecode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] duckdb::Error),

    #[error("Engine error: {0}")]
    EngineState(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a failure of the settings save path
    pub fn persistence(cause: Error) -> Self {
        Error::SettingsPersistence(Box::new(cause))
    }
}
