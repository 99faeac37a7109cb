//! Embedded engine lifecycle
//!
//! One [`EngineHandle`] per session owns an in-memory DuckDB database plus a
//! private scratch directory acting as the engine's file registry. Datasets are
//! registered by name and referenced from SQL through their registry path.
//! Every logical operation opens its own [`EngineConnection`] and closes it
//! before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use duckdb::{Connection, Params};
use regex::Regex;
use tempfile::TempDir;
use url::Url;

use crate::config::EngineConfig;
use crate::{Error, Result};

/// Runtime sizing chosen for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineBundle {
    pub threads: usize,
    pub memory_limit: Option<String>,
}

impl EngineBundle {
    /// Pick a bundle from the host's available parallelism
    pub fn detect() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            threads,
            memory_limit: None,
        }
    }

    /// Apply configured overrides on top of the detected bundle
    pub fn with_overrides(mut self, config: &EngineConfig) -> Self {
        if let Some(threads) = config.threads {
            self.threads = threads.max(1);
        }
        if let Some(limit) = &config.memory_limit {
            self.memory_limit = Some(limit.clone());
        }
        self
    }

    fn to_duckdb_config(&self) -> Result<duckdb::Config> {
        let mut config = duckdb::Config::default().threads(self.threads as i64)?;
        if let Some(limit) = &self.memory_limit {
            config = config.max_memory(limit)?;
        }
        Ok(config)
    }
}

/// How a registered dataset is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProtocol {
    Http,
    File,
}

/// A live engine instance bound to this session
pub struct EngineHandle {
    root: Mutex<Connection>,
    files: Mutex<HashMap<String, PathBuf>>,
    scratch: TempDir,
    http: reqwest::Client,
}

impl EngineHandle {
    /// Instantiate the engine and make sure the parquet reader is available
    pub async fn instantiate(bundle: EngineBundle, http: reqwest::Client) -> Result<Self> {
        tracing::info!(
            "Instantiating engine ({} threads, memory limit {})",
            bundle.threads,
            bundle.memory_limit.as_deref().unwrap_or("default")
        );
        let root = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory_with_flags(bundle.to_duckdb_config()?)?;
            let loaded: bool = conn.query_row(
                "SELECT count(*) > 0 FROM duckdb_extensions() WHERE extension_name = 'parquet' AND loaded",
                [],
                |row| row.get(0),
            )?;
            if !loaded {
                conn.execute_batch("INSTALL parquet; LOAD parquet;")?;
            }
            Ok(conn)
        })
        .await??;

        Ok(Self {
            root: Mutex::new(root),
            files: Mutex::new(HashMap::new()),
            scratch: tempfile::Builder::new().prefix("feedparq-engine").tempdir()?,
            http,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ========== File Registry ==========

    /// Register a dataset fetched from `url` under `name`
    pub async fn register_file_url(&self, name: &str, url: &Url, protocol: DataProtocol) -> Result<()> {
        let bytes = match protocol {
            DataProtocol::Http => {
                let response = self.http.get(url.clone()).send().await?;
                if !response.status().is_success() {
                    return Err(Error::EngineState(format!(
                        "could not fetch {} ({})",
                        url,
                        response.status()
                    )));
                }
                response.bytes().await?.to_vec()
            }
            DataProtocol::File => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::EngineState(format!("not a local file url: {}", url)))?;
                tokio::fs::read(&path).await?
            }
        };
        tracing::debug!("Registered {} from {} ({} bytes)", name, url, bytes.len());
        self.register_file_buffer(name, bytes).await
    }

    /// Register `bytes` as the content of file `name`
    pub async fn register_file_buffer(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.registry_path(name)?;
        tokio::fs::write(&path, bytes).await?;
        self.files_mut().insert(name.to_string(), path);
        Ok(())
    }

    /// Register `name` as an empty file the engine may write into
    pub async fn register_empty_file_buffer(&self, name: &str) -> Result<()> {
        self.register_file_buffer(name, Vec::new()).await
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.files_mut().contains_key(name)
    }

    /// Registry path of a registered file
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        self.files_mut()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EngineState(format!("file not registered: {}", name)))
    }

    /// Copy the current bytes of a registered file out of the engine
    pub async fn copy_file_to_buffer(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    fn registry_path(&self, name: &str) -> Result<PathBuf> {
        static NAME: OnceLock<Regex> = OnceLock::new();
        let pattern = NAME.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]*$").expect("static file name pattern")
        });
        if !pattern.is_match(name) {
            return Err(Error::EngineState(format!("invalid file name: {}", name)));
        }
        Ok(self.scratch.path().join(name))
    }

    fn files_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========== Connections ==========

    /// Open a new logical connection to this instance
    pub fn connect(&self) -> Result<EngineConnection> {
        let root = self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(EngineConnection {
            conn: root.try_clone()?,
        })
    }

    /// Run `f` on a fresh connection off the async executor, closing it afterwards
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&EngineConnection) -> Result<T> + Send + 'static,
    {
        let conn = self.connect()?;
        tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            let closed = conn.close();
            let value = result?;
            closed?;
            Ok(value)
        })
        .await?
    }

    /// Tear the instance down; registered datasets become invalid
    pub fn terminate(self) {
        tracing::debug!("Terminating engine, dropping {}", self.scratch.path().display());
    }
}

/// One open connection, scoped to a single logical operation
pub struct EngineConnection {
    conn: Connection,
}

impl EngineConnection {
    /// Execute statements without reading results
    pub fn send(&self, sql: &str) -> Result<()> {
        tracing::trace!("send: {}", sql.trim());
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Execute one parameterized statement
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run a parameterized query and map every row
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&duckdb::Row<'_>) -> duckdb::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?.collect::<duckdb::Result<Vec<T>>>()?;
        Ok(rows)
    }

    /// Run `f` inside a transaction, rolling back when it fails
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.send("BEGIN TRANSACTION")?;
        match f(self) {
            Ok(value) => {
                self.send("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.send("ROLLBACK") {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Engine(e))
    }
}

/// Quote a registry path as a SQL string literal
pub fn path_literal(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}
