//! Settings store - typed preferences cached in memory, backed by the engine's settings table
//!
//! The cache is seeded with defaults and refreshed by [`SettingsStore::read`].
//! Setters only touch the cache; [`SettingsStore::save`] is the explicit,
//! awaitable persistence step.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::QueryEngine;
use crate::uri::{SettingUrn, assert_urn};
use crate::{Error, Result};

const VIEW_MODE: &str = "viewMode";
const TOP_K: &str = "topK";
const LLMCREDS_MODEL: &str = "llmcreds:model";
const LLMCREDS_KEY: &str = "llmcreds:key";

pub const DEFAULT_TOP_K: usize = 50;

/// How channel rows are presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Links,
    More,
    Ai,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Links => "links",
            ViewMode::More => "more",
            ViewMode::Ai => "ai",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "links" => Ok(ViewMode::Links),
            "more" => Ok(ViewMode::More),
            "ai" => Ok(ViewMode::Ai),
            other => Err(Error::TypeMismatch {
                key: VIEW_MODE.to_string(),
                expected: "one of links, more, ai",
                found: other.to_string(),
            }),
        }
    }
}

/// Credentials for the chat-completion API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCreds {
    pub key: Option<String>,
    pub model: Option<String>,
}

impl LlmCreds {
    pub fn new(key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            model: Some(model.into()),
        }
    }

    /// Both fields present and non-empty
    pub fn is_complete(&self) -> bool {
        let filled = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());
        filled(&self.key) && filled(&self.model)
    }
}

/// Outcome of [`SettingsStore::write`]
#[derive(Debug, Default)]
pub struct WriteReport {
    pub applied: Vec<String>,
    pub rejected: Vec<(String, Error)>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Namespaced cache of scalar preferences
pub struct SettingsStore {
    engine: Arc<QueryEngine>,
    app: String,
    cache: BTreeMap<String, String>,
}

impl SettingsStore {
    /// Create a store for namespace `app`, seeded with the default values
    pub fn new(engine: Arc<QueryEngine>, app: impl Into<String>) -> Self {
        let app = app.into();
        let mut cache = BTreeMap::new();
        cache.insert(urn(&app, "string", VIEW_MODE), ViewMode::default().as_str().to_string());
        cache.insert(urn(&app, "number", TOP_K), DEFAULT_TOP_K.to_string());
        Self { engine, app, cache }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Current cache contents
    pub fn cache(&self) -> &BTreeMap<String, String> {
        &self.cache
    }

    /// Key of a `string` typed setting in this namespace
    pub fn string_key(&self, name: &str) -> String {
        SettingUrn::string(self.app.as_str(), name).to_urn_string()
    }

    // ========== Table Round Trip ==========

    /// Refresh the cache from a full scan of the settings table
    pub async fn read(&mut self) -> Result<BTreeMap<String, String>> {
        for (key, value) in self.engine.read_settings().await? {
            match value {
                Some(value) => {
                    self.cache.insert(key, value);
                }
                None => tracing::debug!("Ignoring null setting {}", key),
            }
        }
        Ok(self.cache.clone())
    }

    /// Upsert every entry; malformed keys are rejected without affecting the others
    pub async fn write(&self, entries: BTreeMap<String, String>) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        let mut valid = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match assert_urn(&key) {
                Ok(()) => valid.push((key, value)),
                Err(e) => {
                    tracing::warn!("Rejected setting {}: {}", key, e);
                    report.rejected.push((key, e));
                }
            }
        }

        if !valid.is_empty() {
            for (key, outcome) in self.engine.upsert_settings(valid).await? {
                match outcome {
                    Ok(()) => report.applied.push(key),
                    Err(e) => {
                        tracing::warn!("Could not write setting {}: {}", key, e);
                        report.rejected.push((key, e));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Write the whole cache through to the table and persist it
    ///
    /// The cache is left as is when persistence fails.
    pub async fn save(&self) -> Result<()> {
        let report = self.write(self.cache.clone()).await.map_err(Error::persistence)?;
        if let Some((key, e)) = report.rejected.into_iter().next() {
            tracing::debug!("First rejected key during save: {}", key);
            return Err(Error::persistence(e));
        }
        self.engine.save_settings().await.map_err(Error::persistence)
    }

    // ========== Typed Accessors ==========

    /// Raw cached value of a `string` typed setting
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.cache.get(&self.string_key(name)).map(String::as_str)
    }

    pub fn view_mode(&self) -> ViewMode {
        match self.get_string(VIEW_MODE) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}, showing links", e);
                ViewMode::Links
            }),
            None => ViewMode::default(),
        }
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        let key = self.string_key(VIEW_MODE);
        self.cache.insert(key, mode.as_str().to_string());
    }

    pub fn top_k(&self) -> usize {
        let key = urn(&self.app, "number", TOP_K);
        match self.cache.get(&key) {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid {} value {:?}, using {}", TOP_K, value, DEFAULT_TOP_K);
                DEFAULT_TOP_K
            }),
            None => DEFAULT_TOP_K,
        }
    }

    pub fn set_top_k(&mut self, k: usize) {
        self.cache.insert(urn(&self.app, "number", TOP_K), k.to_string());
    }

    pub fn llmcreds(&self) -> LlmCreds {
        LlmCreds {
            key: self.get_string(LLMCREDS_KEY).map(str::to_string),
            model: self.get_string(LLMCREDS_MODEL).map(str::to_string),
        }
    }

    /// Store credentials in the cache; both fields are required
    pub fn set_llmcreds(&mut self, creds: &LlmCreds) -> Result<()> {
        let field = |name: &str, value: &Option<String>| -> Result<String> {
            value.clone().ok_or_else(|| Error::TypeMismatch {
                key: format!("llmcreds.{}", name),
                expected: "string",
                found: "missing".to_string(),
            })
        };
        let key = field("key", &creds.key)?;
        let model = field("model", &creds.model)?;

        let key_urn = self.string_key(LLMCREDS_KEY);
        let model_urn = self.string_key(LLMCREDS_MODEL);
        self.cache.insert(key_urn, key);
        self.cache.insert(model_urn, model);
        Ok(())
    }

    pub fn has_llmcreds(&self) -> bool {
        self.llmcreds().is_complete()
    }

    /// Set a cached value from JSON; only strings are accepted
    pub fn set_json(&mut self, kind: &str, name: &str, value: &serde_json::Value) -> Result<()> {
        let key = urn(&self.app, kind, name);
        assert_urn(&key)?;
        match value {
            serde_json::Value::String(s) => {
                self.cache.insert(key, s.clone());
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                key,
                expected: "string",
                found: json_type_name(other).to_string(),
            }),
        }
    }
}

fn urn(app: &str, kind: &str, name: &str) -> String {
    SettingUrn::new(app, kind, name).to_urn_string()
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineBundle, EngineHandle};
    use crate::vfs::{MemorySubstrate, VirtualFileStore};
    use serde_json::json;

    async fn engine_on(fs: Arc<VirtualFileStore>) -> Arc<QueryEngine> {
        let handle = EngineHandle::instantiate(EngineBundle::detect(), reqwest::Client::new())
            .await
            .unwrap();
        Arc::new(QueryEngine::new(Arc::new(handle), fs, "settings.parquet").unwrap())
    }

    async fn loaded_store() -> (SettingsStore, Arc<VirtualFileStore>) {
        let fs = Arc::new(VirtualFileStore::new(Arc::new(MemorySubstrate::new("feedparq.fs"))));
        let engine = engine_on(fs.clone()).await;
        engine.load_settings().await.unwrap();
        (SettingsStore::new(engine, "feedparq"), fs)
    }

    #[test]
    fn test_view_mode_parse() {
        assert_eq!("ai".parse::<ViewMode>().unwrap(), ViewMode::Ai);
        assert_eq!(ViewMode::More.to_string(), "more");
        assert!(matches!("grid".parse::<ViewMode>(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_llmcreds_completeness() {
        assert!(LlmCreds::new("sk-1", "gpt-4o-mini").is_complete());
        assert!(!LlmCreds::new("", "gpt-4o-mini").is_complete());
        assert!(!LlmCreds { key: Some("sk-1".to_string()), model: None }.is_complete());
        assert!(!LlmCreds::default().is_complete());
    }

    #[tokio::test]
    async fn test_defaults_before_read() {
        let (store, _) = loaded_store().await;
        assert_eq!(store.view_mode(), ViewMode::Links);
        assert_eq!(store.top_k(), 50);
        assert!(!store.has_llmcreds());
        assert_eq!(
            store.cache().get("urn:feedparq:settings:number:topK").map(String::as_str),
            Some("50")
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut store, _) = loaded_store().await;
        let entries = BTreeMap::from([
            ("urn:feedparq:settings:string:viewMode".to_string(), "more".to_string()),
            ("urn:feedparq:settings:string:theme".to_string(), "dark".to_string()),
        ]);

        let report = store.write(entries).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 2);

        let map = store.read().await.unwrap();
        assert_eq!(map["urn:feedparq:settings:string:theme"], "dark");
        assert_eq!(store.view_mode(), ViewMode::More);
    }

    #[tokio::test]
    async fn test_malformed_key_does_not_abort_batch() {
        let (mut store, _) = loaded_store().await;
        let entries = BTreeMap::from([
            ("viewMode".to_string(), "ai".to_string()),
            ("urn:feedparq:settings:string:theme".to_string(), "light".to_string()),
        ]);

        let report = store.write(entries).await.unwrap();
        assert_eq!(report.applied, vec!["urn:feedparq:settings:string:theme".to_string()]);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0].1, Error::MalformedUrn(_)));

        let map = store.read().await.unwrap();
        assert_eq!(map["urn:feedparq:settings:string:theme"], "light");
        assert!(!map.contains_key("viewMode"));
    }

    #[tokio::test]
    async fn test_save_view_mode_scenario() {
        let (mut store, fs) = loaded_store().await;
        assert!(store.engine.read_settings().await.unwrap().is_empty());

        store.set_view_mode(ViewMode::Ai);
        store.save().await.unwrap();

        let map = store.read().await.unwrap();
        assert_eq!(map["urn:feedparq:settings:string:viewMode"], "ai");
        assert_eq!(map["urn:feedparq:settings:number:topK"], "50");

        // A fresh session over the same store sees the persisted value
        let engine = engine_on(fs).await;
        engine.load_settings().await.unwrap();
        let mut reloaded = SettingsStore::new(engine, "feedparq");
        reloaded.read().await.unwrap();
        assert_eq!(reloaded.view_mode(), ViewMode::Ai);
    }

    #[tokio::test]
    async fn test_llmcreds_setter() {
        let (mut store, _) = loaded_store().await;

        let partial = LlmCreds { key: Some("sk-1".to_string()), model: None };
        assert!(matches!(store.set_llmcreds(&partial), Err(Error::TypeMismatch { .. })));
        assert!(!store.has_llmcreds());

        store.set_llmcreds(&LlmCreds::new("sk-1", "gpt-4o-mini")).unwrap();
        assert!(store.has_llmcreds());
        assert_eq!(
            store.get_string("llmcreds:model"),
            Some("gpt-4o-mini")
        );

        store.set_llmcreds(&LlmCreds::new("", "gpt-4o-mini")).unwrap();
        assert!(!store.has_llmcreds());
    }

    #[tokio::test]
    async fn test_set_json_rejects_non_strings() {
        let (mut store, _) = loaded_store().await;

        let result = store.set_json("string", "viewMode", &json!(3));
        match result {
            Err(Error::TypeMismatch { found, .. }) => assert_eq!(found, "number"),
            other => panic!("expected type mismatch, got {:?}", other),
        }
        assert_eq!(store.view_mode(), ViewMode::Links);

        store.set_json("number", "topK", &json!("12")).unwrap();
        assert_eq!(store.top_k(), 12);

        store.set_json("number", "topK", &json!("lots")).unwrap();
        assert_eq!(store.top_k(), DEFAULT_TOP_K);
    }

    #[tokio::test]
    async fn test_unknown_view_mode_falls_back_to_links() {
        let (mut store, _) = loaded_store().await;
        store.set_json("string", "viewMode", &json!("grid")).unwrap();
        assert_eq!(store.view_mode(), ViewMode::Links);
    }
}
