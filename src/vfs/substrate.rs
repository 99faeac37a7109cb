//! Persistent key-value substrate
//!
//! The narrow contract the virtual file store consumes: `get_item`, `set_item`,
//! `remove_item`, `keys`, `length` and `clear`, all namespaced by a store name.
//! Concurrent writers to one key race at the substrate's own granularity; the
//! last write wins.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::schema;
use crate::Result;

/// Durable key-value storage local to this profile
#[async_trait]
pub trait KvSubstrate: Send + Sync {
    /// Namespace every key of this substrate lives in
    fn store_name(&self) -> &str;

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_item(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn remove_item(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn length(&self) -> Result<usize>;

    /// Drop every key of this store name
    async fn clear(&self) -> Result<()>;
}

/// SQLite-backed substrate
pub struct SqliteSubstrate {
    conn: Arc<Mutex<Connection>>,
    store: String,
}

impl SqliteSubstrate {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path, store_name: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, store_name)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(store_name: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, store_name)
    }

    fn with_connection(conn: Connection, store_name: impl Into<String>) -> Result<Self> {
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store: store_name.into(),
        })
    }

    /// Run one statement group off the async executor
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard, &store).map_err(Into::into)
        })
        .await?
    }
}

#[async_trait]
impl KvSubstrate for SqliteSubstrate {
    fn store_name(&self) -> &str {
        &self.store
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |conn, store| {
            conn.query_row(
                "SELECT value FROM kv_items WHERE store = ?1 AND key = ?2",
                params![store, key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set_item(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.run(move |conn, store| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_items (store, key, value) VALUES (?1, ?2, ?3)",
                params![store, key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(move |conn, store| {
            conn.execute(
                "DELETE FROM kv_items WHERE store = ?1 AND key = ?2",
                params![store, key],
            )
            .map(|_| ())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.run(|conn, store| {
            let mut stmt = conn.prepare("SELECT key FROM kv_items WHERE store = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map([store], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn length(&self) -> Result<usize> {
        self.run(|conn, store| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv_items WHERE store = ?1",
                [store],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.run(|conn, store| {
            conn.execute("DELETE FROM kv_items WHERE store = ?1", [store])
                .map(|_| ())
        })
        .await
    }
}

/// Process-local substrate (for testing)
pub struct MemorySubstrate {
    items: Mutex<BTreeMap<String, Vec<u8>>>,
    store: String,
}

impl MemorySubstrate {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            store: store_name.into(),
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KvSubstrate for MemorySubstrate {
    fn store_name(&self) -> &str {
        &self.store
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.items().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.items().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items().keys().cloned().collect())
    }

    async fn length(&self) -> Result<usize> {
        Ok(self.items().len())
    }

    async fn clear(&self) -> Result<()> {
        self.items().clear();
        Ok(())
    }
}
