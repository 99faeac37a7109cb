use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "feedparq";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedparqConfig {
    pub app_name: String,
    pub store: StoreConfig,
    pub channel: ChannelConfig,
    pub settings: SettingsConfig,
    pub llm: LlmConfig,
    pub engine: EngineConfig,
}

impl Default for FeedparqConfig {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            store: StoreConfig::default(),
            channel: ChannelConfig::default(),
            settings: SettingsConfig::default(),
            llm: LlmConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Virtual file store substrate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub name: String,
    /// Authority segment every stored key must carry
    pub store_name: String,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "fs".to_string(),
            store_name: format!("{}.fs", APP_NAME),
            path: PathBuf::from(".feedparq").join("fs.db"),
        }
    }
}

/// Remote channel dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    pub url: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "news.parquet".to_string(),
            url: "https://assets.feedparq.club/news.parquet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// File name of the settings blob, both in the engine and in the store
    pub name: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            name: "settings.parquet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub default_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Overrides for the host-detected engine bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub threads: Option<usize>,
    pub memory_limit: Option<String>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("feedparq.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<FeedparqConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: FeedparqConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &FeedparqConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_store_dir(store_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = store_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
