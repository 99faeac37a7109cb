//! Query engine implementation
//!
//! Provides the session-level operations over the embedded engine:
//! - Binding the remote channel dataset as a view (after a liveness probe)
//! - Loading the settings table from the virtual file store, or creating it
//! - Persisting the settings table back as a parquet blob
//! - Reading and upserting settings rows, querying the newest channel entries

use std::sync::Arc;

use duckdb::params;
use url::Url;

use super::handle::{DataProtocol, EngineHandle};
use super::schema;
use crate::channel::FeedRow;
use crate::vfs::{FileBlob, VirtualFileStore};
use crate::{Error, Result};

/// Outcome of one upsert in a batch
pub type UpsertResult = (String, Result<()>);

/// Session-scoped operations over one engine instance
pub struct QueryEngine {
    handle: Arc<EngineHandle>,
    fs: Arc<VirtualFileStore>,
    settings_name: String,
    settings_url: Url,
}

impl QueryEngine {
    /// Create a new query engine persisting settings as `settings_name`
    pub fn new(handle: Arc<EngineHandle>, fs: Arc<VirtualFileStore>, settings_name: &str) -> Result<Self> {
        let settings_url = fs.file_path_to_url(settings_name)?;
        Ok(Self {
            handle,
            fs,
            settings_name: settings_name.to_string(),
            settings_url,
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Tear the engine down once no other owner holds it
    pub fn terminate(self) {
        match Arc::try_unwrap(self.handle) {
            Ok(handle) => handle.terminate(),
            Err(_) => tracing::debug!("Engine still shared, leaving teardown to the last owner"),
        }
    }

    /// Key of the persisted settings blob
    pub fn settings_url(&self) -> &Url {
        &self.settings_url
    }

    // ========== Channel ==========

    /// Probe `url`, register it under `name` and expose it as the `channel` view
    pub async fn load_channel(&self, name: &str, url: &Url) -> Result<()> {
        let protocol = self.probe_channel(url).await?;
        self.handle.register_file_url(name, url, protocol).await?;

        let path = self.handle.file_path(name)?;
        self.handle
            .with_connection(move |conn| conn.send(&schema::create_channel_view(&path)))
            .await?;

        tracing::info!("Loaded channel {} from {}", name, url);
        Ok(())
    }

    async fn probe_channel(&self, url: &Url) -> Result<DataProtocol> {
        let unavailable = |status: String| Error::ChannelUnavailable {
            url: url.to_string(),
            status,
        };

        match url.scheme() {
            "http" | "https" => {
                let response = self
                    .handle
                    .http()
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(unavailable(response.status().to_string()));
                }
                Ok(DataProtocol::Http)
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| unavailable("not a local path".to_string()))?;
                if !tokio::fs::try_exists(&path).await? {
                    return Err(unavailable("no such file".to_string()));
                }
                Ok(DataProtocol::File)
            }
            other => Err(unavailable(format!("unsupported scheme {}", other))),
        }
    }

    /// Newest `k` entries of the channel
    pub async fn top_k(&self, k: usize) -> Result<Vec<FeedRow>> {
        self.handle
            .with_connection(move |conn| {
                conn.query(schema::SELECT_TOP_K, params![k as i64], FeedRow::from_row)
            })
            .await
    }

    // ========== Settings Table ==========

    /// Load the settings table, falling back to an empty table on failure
    ///
    /// A persisted blob replaces the table contents. Without a blob an empty
    /// table is created and immediately persisted so the store has a baseline.
    pub async fn load_settings(&self) -> Result<()> {
        match self.try_load_settings().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Could not load settings, using an empty table: {}", e);
                self.handle
                    .with_connection(|conn| conn.send(schema::CREATE_SETTINGS_TABLE))
                    .await
            }
        }
    }

    async fn try_load_settings(&self) -> Result<()> {
        if self.fs.exists(&self.settings_url).await? {
            let file = self
                .fs
                .read(&self.settings_url)
                .await?
                .ok_or_else(|| Error::InvalidPayload(format!("{} vanished", self.settings_url)))?;
            tracing::debug!("Loading settings from {} ({} bytes)", self.settings_url, file.size());

            self.handle
                .register_file_buffer(&self.settings_name, file.into_bytes())
                .await?;
            let path = self.handle.file_path(&self.settings_name)?;
            self.handle
                .with_connection(move |conn| {
                    conn.transaction(|tx| {
                        tx.send(schema::DROP_SETTINGS_TABLE)?;
                        tx.send(schema::CREATE_SETTINGS_TABLE)?;
                        tx.send(&schema::import_settings(&path))
                    })
                })
                .await
        } else {
            tracing::debug!("No settings at {}, creating an empty table", self.settings_url);
            self.handle.register_empty_file_buffer(&self.settings_name).await?;
            self.handle
                .with_connection(|conn| conn.send(schema::CREATE_SETTINGS_TABLE))
                .await?;
            self.save_settings().await
        }
    }

    /// Export the settings table and write it to the virtual file store
    ///
    /// This is the only persistence path for settings.
    pub async fn save_settings(&self) -> Result<()> {
        if !self.handle.is_registered(&self.settings_name) {
            self.handle.register_empty_file_buffer(&self.settings_name).await?;
        }
        let path = self.handle.file_path(&self.settings_name)?;
        self.handle
            .with_connection(move |conn| conn.send(&schema::export_settings(&path)))
            .await?;

        let bytes = self.handle.copy_file_to_buffer(&self.settings_name).await?;
        let file = FileBlob::new(self.settings_name.clone(), bytes);
        self.fs.write(&self.settings_url, &file).await?;

        tracing::debug!("Saved settings to {} ({} bytes)", self.settings_url, file.size());
        Ok(())
    }

    /// Every row of the settings table
    pub async fn read_settings(&self) -> Result<Vec<(String, Option<String>)>> {
        self.handle
            .with_connection(|conn| {
                conn.query(schema::SELECT_SETTINGS, [], |row| Ok((row.get(0)?, row.get(1)?)))
            })
            .await
    }

    /// Upsert every entry on one connection, each statement independent of the others
    ///
    /// All statements complete before the connection closes.
    pub async fn upsert_settings(&self, entries: Vec<(String, String)>) -> Result<Vec<UpsertResult>> {
        self.handle
            .with_connection(move |conn| {
                let results = entries
                    .into_iter()
                    .map(|(key, value)| {
                        let outcome = conn
                            .execute(schema::UPSERT_SETTING, params![key, value])
                            .map(|_| ());
                        (key, outcome)
                    })
                    .collect();
                Ok(results)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineBundle;
    use crate::engine::handle::path_literal;
    use crate::vfs::MemorySubstrate;
    use std::collections::BTreeMap;

    async fn setup() -> (QueryEngine, Arc<VirtualFileStore>, Arc<MemorySubstrate>) {
        let substrate = Arc::new(MemorySubstrate::new("feedparq.fs"));
        let fs = Arc::new(VirtualFileStore::new(substrate.clone()));
        let handle = EngineHandle::instantiate(EngineBundle::detect(), reqwest::Client::new())
            .await
            .unwrap();
        let engine = QueryEngine::new(Arc::new(handle), fs.clone(), "settings.parquet").unwrap();
        (engine, fs, substrate)
    }

    async fn fresh_engine_on(fs: Arc<VirtualFileStore>) -> QueryEngine {
        let handle = EngineHandle::instantiate(EngineBundle::detect(), reqwest::Client::new())
            .await
            .unwrap();
        QueryEngine::new(Arc::new(handle), fs, "settings.parquet").unwrap()
    }

    fn as_map(rows: Vec<(String, Option<String>)>) -> BTreeMap<String, Option<String>> {
        rows.into_iter().collect()
    }

    /// Write a small channel parquet file through DuckDB itself
    async fn write_channel_fixture(path: std::path::PathBuf) {
        tokio::task::spawn_blocking(move || {
            let conn = duckdb::Connection::open_in_memory().unwrap();
            conn.execute_batch(&format!(
                "COPY (
                    SELECT * FROM (VALUES
                        ('a', 'Older', 'https://example.com/a', '', 'first', '', '', 1000::BIGINT),
                        ('b', 'Newest', 'https://example.com/b', 'https://cdn.example.com/b.mp3', '', 'body', '', 3000::BIGINT),
                        ('c', 'Middle', 'https://example.com/c', '', '', '', 'media', 2000::BIGINT)
                    ) AS t(id, title, link, media_url, summary, content, media_descriptions, published_ms)
                ) TO {} (FORMAT 'parquet')",
                path_literal(&path)
            ))
            .unwrap();
        })
        .await
        .unwrap();
    }

    /// Column names/types and rows of a persisted settings blob, read back by a separate DuckDB
    fn decode_settings_blob(bytes: &[u8]) -> (Vec<(String, String)>, Vec<(String, Option<String>)>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.parquet");
        std::fs::write(&path, bytes).unwrap();
        let source = format!("read_parquet({})", path_literal(&path));

        let conn = duckdb::Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare(&format!("DESCRIBE SELECT * FROM {}", source))
            .unwrap();
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT key, value FROM {} ORDER BY key", source))
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        (columns, rows)
    }

    #[tokio::test]
    async fn test_load_without_blob_creates_and_persists_empty_table() {
        let (engine, fs, _) = setup().await;
        assert!(!fs.exists(engine.settings_url()).await.unwrap());

        engine.load_settings().await.unwrap();

        assert!(engine.read_settings().await.unwrap().is_empty());
        let blob = fs.read(engine.settings_url()).await.unwrap().unwrap();
        assert_eq!(blob.name(), "settings.parquet");
        assert!(blob.bytes().starts_with(b"PAR1"));
    }

    #[tokio::test]
    async fn test_save_then_fresh_load_roundtrip() {
        let (engine, fs, _) = setup().await;
        engine.load_settings().await.unwrap();
        let results = engine
            .upsert_settings(vec![
                ("urn:feedparq:settings:string:viewMode".to_string(), "ai".to_string()),
                ("urn:feedparq:settings:number:topK".to_string(), "20".to_string()),
            ])
            .await
            .unwrap();
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        engine.save_settings().await.unwrap();

        let reloaded = fresh_engine_on(fs).await;
        reloaded.load_settings().await.unwrap();

        assert_eq!(
            as_map(reloaded.read_settings().await.unwrap()),
            as_map(engine.read_settings().await.unwrap())
        );
    }

    #[tokio::test]
    async fn test_repeated_load_without_blob_is_idempotent() {
        let (engine, fs, _) = setup().await;

        engine.load_settings().await.unwrap();
        let first = fs.read(engine.settings_url()).await.unwrap().unwrap();

        engine.load_settings().await.unwrap();
        engine.save_settings().await.unwrap();
        let second = fs.read(engine.settings_url()).await.unwrap().unwrap();

        assert_eq!(first.name(), second.name());
        let (first_columns, first_rows) = decode_settings_blob(first.bytes());
        let (second_columns, second_rows) = decode_settings_blob(second.bytes());
        assert_eq!(first_columns, vec![
            ("key".to_string(), "VARCHAR".to_string()),
            ("value".to_string(), "VARCHAR".to_string()),
        ]);
        assert_eq!(first_columns, second_columns);
        assert!(first_rows.is_empty());
        assert_eq!(first_rows, second_rows);
        assert!(engine.read_settings().await.unwrap().is_empty());

        let reloaded = fresh_engine_on(fs).await;
        reloaded.load_settings().await.unwrap();
        assert!(reloaded.read_settings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_updates_on_conflict() {
        let (engine, _, _) = setup().await;
        engine.load_settings().await.unwrap();

        let key = "urn:feedparq:settings:string:viewMode".to_string();
        engine.upsert_settings(vec![(key.clone(), "links".to_string())]).await.unwrap();
        engine.upsert_settings(vec![(key.clone(), "more".to_string())]).await.unwrap();

        let rows = engine.read_settings().await.unwrap();
        assert_eq!(rows, vec![(key, Some("more".to_string()))]);
    }

    #[tokio::test]
    async fn test_values_are_bound_not_interpolated() {
        let (engine, _, _) = setup().await;
        engine.load_settings().await.unwrap();

        let hostile = "x'); DROP TABLE settings; --".to_string();
        let key = "urn:feedparq:settings:string:note".to_string();
        engine.upsert_settings(vec![(key.clone(), hostile.clone())]).await.unwrap();

        let rows = as_map(engine.read_settings().await.unwrap());
        assert_eq!(rows.get(&key), Some(&Some(hostile)));
    }

    #[tokio::test]
    async fn test_corrupt_blob_falls_back_without_overwriting() {
        let (engine, fs, _) = setup().await;
        let corrupt = FileBlob::new("settings.parquet", b"definitely not parquet".to_vec());
        fs.write(engine.settings_url(), &corrupt).await.unwrap();

        engine.load_settings().await.unwrap();

        assert!(engine.read_settings().await.unwrap().is_empty());
        assert_eq!(fs.read(engine.settings_url()).await.unwrap().unwrap(), corrupt);
    }

    #[tokio::test]
    async fn test_load_channel_from_file_and_top_k() {
        let (engine, _, _) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.parquet");
        write_channel_fixture(path.clone()).await;

        let url = Url::from_file_path(&path).unwrap();
        engine.load_channel("news.parquet", &url).await.unwrap();

        let rows = engine.top_k(2).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(rows[0].media_url, "https://cdn.example.com/b.mp3");
        assert_eq!(rows[0].published_ms, 3000);
    }

    #[tokio::test]
    async fn test_missing_channel_is_unavailable() {
        let (engine, _, _) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.parquet")).unwrap();

        let result = engine.load_channel("absent.parquet", &url).await;
        assert!(matches!(result, Err(Error::ChannelUnavailable { .. })));
        assert!(engine.top_k(1).await.is_err());
    }

    #[tokio::test]
    async fn test_http_channel_probe() {
        let server = httpmock::MockServer::start_async().await;
        let missing = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/missing.parquet");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("news.parquet");
        write_channel_fixture(fixture.clone()).await;
        let body = std::fs::read(&fixture).unwrap();
        let found = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/news.parquet");
                then.status(200)
                    .header("content-type", "application/vnd.apache.parquet")
                    .body(body);
            })
            .await;

        let (engine, _, _) = setup().await;
        let missing_url = Url::parse(&server.url("/missing.parquet")).unwrap();
        let result = engine.load_channel("missing.parquet", &missing_url).await;
        assert!(matches!(result, Err(Error::ChannelUnavailable { .. })));
        missing.assert_async().await;

        let url = Url::parse(&server.url("/news.parquet")).unwrap();
        engine.load_channel("news.parquet", &url).await.unwrap();
        assert_eq!(engine.top_k(10).await.unwrap().len(), 3);
        found.assert_hits_async(2).await;
    }
}
