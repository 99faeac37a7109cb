//! Feedparq CLI - read a columnar content feed from the terminal

use anyhow::Context;
use clap::{Parser, Subcommand};
use feedparq::app::Presentation;
use feedparq::config::{self, FeedparqConfig};
use feedparq::settings::{LlmCreds, ViewMode};
use feedparq::ui::{self, Icons, Spinner, TableBuilder};
use feedparq::{App, VirtualFileStore};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "feedparq")]
#[command(version)]
#[command(about = "Reader for syndicated content feeds published as parquet")]
#[command(long_about = r#"
Feedparq queries a channel of feed entries published as a parquet object,
remembers your preferences locally, and can ask a language model to curate
the newest entries into a single page.

Example usage:
  feedparq init
  feedparq show --view more --limit 20
  feedparq show --view ai --key sk-... --model gpt-4o-mini
  feedparq settings set topK '"25"' --type number
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show the newest channel entries
    Show {
        /// View mode to switch to (links, more, ai)
        #[arg(long, value_parser = parse_view)]
        view: Option<ViewMode>,

        /// Number of entries (defaults to the stored topK)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Override the channel URL or path
        #[arg(long)]
        channel_url: Option<String>,

        /// API key for the ai view
        #[arg(long, requires = "model")]
        key: Option<String>,

        /// Model for the ai view
        #[arg(long, requires = "key")]
        model: Option<String>,

        /// Write the ai page to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Inspect or change stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Inspect or wipe the local file store
    Fs {
        #[command(subcommand)]
        action: FsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// List every setting
    Get,

    /// Set one setting from a JSON value
    Set {
        /// Setting name, e.g. viewMode
        name: String,

        /// JSON value; only strings are accepted
        value: String,

        /// Type segment of the setting key
        #[arg(short = 't', long = "type", default_value = "string")]
        kind: String,
    },
}

#[derive(Subcommand)]
enum FsAction {
    /// List stored files
    Ls,

    /// Delete every stored file
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            config::write_config(&path, &FeedparqConfig::default(), force)?;
            ui::success(&format!("Wrote {}", path.display()));
        }

        Commands::Show {
            view,
            limit,
            channel_url,
            key,
            model,
            out,
        } => {
            let mut config = load(cli.config)?;
            if let Some(url) = channel_url {
                config.channel.url = url;
            }
            let channel = config.channel.url.clone();

            let spinner = Spinner::new(&format!("Loading {}", channel));
            let mut app = match App::bootstrap(config).await {
                Ok(app) => app,
                Err(e @ feedparq::Error::ChannelUnavailable { .. }) => {
                    spinner.finish_and_clear();
                    ui::error(&format!("Channel not found: {}", channel));
                    return Err(e.into());
                }
                Err(e) => {
                    spinner.finish_and_clear();
                    return Err(e).context("could not start session");
                }
            };
            spinner.finish_and_clear();

            if let (Some(key), Some(model)) = (key, model) {
                app.store_llmcreds(&LlmCreds::new(key, model)).await?;
            }
            if let Some(mode) = view {
                app.select_view(mode).await;
            }

            let rows = app.rows(limit).await?;
            if rows.is_empty() {
                ui::warn("The channel has no entries");
            }

            let spinner = Spinner::new(&format!("{} Preparing the {} view", Icons::ROBOT, app.settings().view_mode()));
            let mut renderer = |html: &str| spinner.set_message(&format!("Received {}", ui::human_bytes(html.len() as u64)));
            let presentation = app.present(rows, &mut renderer).await;
            spinner.finish_and_clear();

            match presentation? {
                Presentation::Links(rows) => {
                    ui::header(&format!("{} newest entries", rows.len()));
                    rows.iter().for_each(ui::feed_link);
                }
                Presentation::More(rows) => {
                    ui::header(&format!("{} newest entries", rows.len()));
                    println!();
                    rows.iter().for_each(ui::feed_more);
                }
                Presentation::Ai(generation) => match out {
                    Some(path) => {
                        std::fs::write(&path, &generation.html)
                            .with_context(|| format!("could not write {}", path.display()))?;
                        ui::success(&format!("Page written to {}", path.display()));
                    }
                    None => println!("{}", generation.html),
                },
            }

            app.shutdown();
        }

        Commands::Settings { action } => {
            let config = load(cli.config)?;
            let mut app = App::settings_only(config).await?;
            match action {
                SettingsAction::Get => {
                    let mut table = TableBuilder::new();
                    for (key, value) in app.settings().cache() {
                        table.add_row(key, &redact(key, value));
                    }
                    ui::section("Settings");
                    println!("{}", table.build());
                    ui::info(
                        &format!("{} Credentials", Icons::KEY),
                        if app.settings().has_llmcreds() { "stored" } else { "missing" },
                    );
                }
                SettingsAction::Set { name, value, kind } => {
                    let json: serde_json::Value = serde_json::from_str(&value)
                        .with_context(|| format!("value is not JSON: {}", value))?;
                    app.settings_mut().set_json(&kind, &name, &json)?;
                    app.settings().save().await?;
                    ui::success(&format!("Saved {}", name));
                }
            }
            app.shutdown();
        }

        Commands::Fs { action } => {
            let config = load(cli.config)?;
            let fs = VirtualFileStore::open(&config.store)?;
            match action {
                FsAction::Ls => {
                    let keys = fs.list().await?;
                    if keys.is_empty() {
                        ui::info(&format!("{} {}", Icons::DATABASE, fs.store_name()), "empty");
                    }
                    for key in keys {
                        let size = fs.read(&key).await?.map(|file| file.size()).unwrap_or(0);
                        ui::stored_file(key.as_str(), size);
                    }
                }
                FsAction::Clear => {
                    let count = fs.size().await?;
                    fs.clear().await?;
                    ui::success(&format!("{} Deleted {} stored files", Icons::DEL, count));
                }
            }
        }
    }

    Ok(())
}

fn parse_view(raw: &str) -> Result<ViewMode, String> {
    raw.parse().map_err(|e: feedparq::Error| e.to_string())
}

/// Config file values, or defaults when there is no file
fn load(path: Option<PathBuf>) -> anyhow::Result<FeedparqConfig> {
    let config = config::load_config(path.as_deref())?.unwrap_or_default();
    config::ensure_store_dir(&config.store.path)?;
    Ok(config)
}

/// Hide stored API keys in listings
fn redact(key: &str, value: &str) -> String {
    if key.ends_with(":llmcreds:key") && !value.is_empty() {
        let visible: String = value.chars().take(3).collect();
        format!("{}…", visible)
    } else {
        value.to_string()
    }
}
