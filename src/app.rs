//! Session context
//!
//! Built once per session. Bootstrap is strictly ordered because each step
//! depends on the committed state of the previous one:
//! engine instantiation, channel view, settings table, settings cache.

use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::channel::FeedRow;
use crate::config::FeedparqConfig;
use crate::engine::{EngineBundle, EngineHandle, QueryEngine};
use crate::llm::{CompletionClient, Generation, Renderer};
use crate::settings::{LlmCreds, SettingsStore, ViewMode};
use crate::vfs::VirtualFileStore;
use crate::{Error, Result};

/// What a view mode produced for the current rows
#[derive(Debug)]
pub enum Presentation {
    Links(Vec<FeedRow>),
    More(Vec<FeedRow>),
    Ai(Generation),
}

pub struct App {
    config: FeedparqConfig,
    fs: Arc<VirtualFileStore>,
    engine: Arc<QueryEngine>,
    settings: SettingsStore,
    llm: CompletionClient,
}

impl App {
    /// Open the configured store and bootstrap a session over it
    pub async fn bootstrap(config: FeedparqConfig) -> Result<Self> {
        let fs = Arc::new(VirtualFileStore::open(&config.store)?);
        Self::with_store(config, fs).await
    }

    /// Bootstrap a session over an already opened store
    pub async fn with_store(config: FeedparqConfig, fs: Arc<VirtualFileStore>) -> Result<Self> {
        Self::start(config, fs, true).await
    }

    /// Bootstrap without binding the channel, for settings maintenance
    pub async fn settings_only(config: FeedparqConfig) -> Result<Self> {
        let fs = Arc::new(VirtualFileStore::open(&config.store)?);
        Self::start(config, fs, false).await
    }

    async fn start(config: FeedparqConfig, fs: Arc<VirtualFileStore>, with_channel: bool) -> Result<Self> {
        let http = reqwest::Client::new();

        let bundle = EngineBundle::detect().with_overrides(&config.engine);
        let handle = EngineHandle::instantiate(bundle, http.clone()).await?;
        let engine = Arc::new(QueryEngine::new(Arc::new(handle), fs.clone(), &config.settings.name)?);

        if with_channel {
            let channel_url = resolve_channel_url(&config.channel.url)?;
            engine.load_channel(&config.channel.name, &channel_url).await?;
        }

        engine.load_settings().await?;
        let mut settings = SettingsStore::new(engine.clone(), config.app_name.clone());
        settings.read().await?;

        let llm = CompletionClient::from_config(http, &config.llm)?;
        tracing::info!("Session ready ({} view)", settings.view_mode());

        Ok(Self {
            config,
            fs,
            engine,
            settings,
            llm,
        })
    }

    pub fn config(&self) -> &FeedparqConfig {
        &self.config
    }

    pub fn fs(&self) -> &VirtualFileStore {
        &self.fs
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    /// Await a settings save, reporting failure without propagating it
    pub async fn persist_settings(&self) -> bool {
        match self.settings.save().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    /// Newest channel rows; `limit` overrides the stored `topK`
    pub async fn rows(&self, limit: Option<usize>) -> Result<Vec<FeedRow>> {
        let k = limit.unwrap_or_else(|| self.settings.top_k());
        self.engine.top_k(k).await
    }

    /// Switch the view mode and persist the choice
    pub async fn select_view(&mut self, mode: ViewMode) {
        if self.settings.view_mode() == mode {
            return;
        }
        self.settings.set_view_mode(mode);
        self.persist_settings().await;
    }

    /// Store credentials supplied by the user and persist them
    pub async fn store_llmcreds(&mut self, creds: &LlmCreds) -> Result<()> {
        self.settings.set_llmcreds(creds)?;
        self.persist_settings().await;
        Ok(())
    }

    /// Produce the presentation of `rows` for the current view mode
    pub async fn present(&self, rows: Vec<FeedRow>, renderer: &mut dyn Renderer) -> Result<Presentation> {
        match self.settings.view_mode() {
            ViewMode::Links => Ok(Presentation::Links(rows)),
            ViewMode::More => Ok(Presentation::More(rows)),
            ViewMode::Ai => {
                if !self.settings.has_llmcreds() {
                    return Err(Error::Config(
                        "the ai view needs credentials (pass --key and --model)".to_string(),
                    ));
                }
                let generation = self
                    .llm
                    .generate(&rows, &self.settings.llmcreds(), renderer)
                    .await?;
                Ok(Presentation::Ai(generation))
            }
        }
    }

    /// End the session and tear the engine down
    pub fn shutdown(self) {
        let Self { engine, settings, .. } = self;
        drop(settings);
        match Arc::try_unwrap(engine) {
            Ok(engine) => engine.terminate(),
            Err(_) => tracing::debug!("Engine still referenced at shutdown"),
        }
    }
}

/// Accept either an absolute URL or a local path for the channel dataset
///
/// Paths are made absolute without touching the filesystem; existence is
/// checked by the channel probe.
pub fn resolve_channel_url(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = std::path::absolute(Path::new(raw))?;
            Url::from_file_path(&path)
                .map_err(|_| Error::Config(format!("invalid channel path: {}", path.display())))
        }
        Err(e) => Err(e.into()),
    }
}
