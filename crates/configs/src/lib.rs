//! # configs
//!
//! Layered settings for the collector binary. Later layers win:
//! built-in defaults, then `collector.toml` (or the file named by
//! `COLLECTOR_CONFIG`), then `COLLECTOR__`-prefixed environment variables
//! such as `COLLECTOR__DATABASE__URL`.

use std::net::SocketAddr;
use std::path::PathBuf;

use config::{Config, Environment, File, Source};
use secrecy::SecretString;
use serde::Deserialize;

/// Names an explicit settings file; it must then exist.
pub const CONFIG_PATH_VAR: &str = "COLLECTOR_CONFIG";
const DEFAULT_FILE: &str = "collector";
const ENV_PREFIX: &str = "COLLECTOR";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub bind: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Without a URL the collector keeps everything in memory.
    pub url: Option<SecretString>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Settings {
    /// Loads `.env`, then every configuration layer.
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();

        let file = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => File::from(PathBuf::from(path)).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        Self::from_sources(file, environment())
    }

    fn from_sources<F>(file: F, env: Environment) -> Result<Self, SettingsError>
    where
        F: Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("database.max_connections", 10)?
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?
            .add_source(file)
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
