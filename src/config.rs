//! Connection configuration.
//!
//! Looked up in order: `./keel.toml`, then `<config dir>/keel/keel.toml`.
//! `KEEL_DATABASE_URL` overrides the URL from either file.

use crate::error::{KeelError, KeelResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the database URL.
pub const DATABASE_URL_ENV: &str = "KEEL_DATABASE_URL";

/// Top-level `keel.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://app.db` or `sqlite::memory:`
    #[serde(default = "default_url")]
    pub url: String,

    /// Create the database file when it does not exist
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

fn default_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> KeelResult<Self> {
        toml::from_str(content).map_err(|e| KeelError::Config(e.to_string()))
    }

    /// Read a config file.
    pub fn from_file(path: impl AsRef<Path>) -> KeelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Default search path for `keel.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from("keel.toml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("keel").join("keel.toml"))
            .filter(|path| path.exists())
    }

    /// Load from the default path (or defaults), then apply the environment.
    pub fn load() -> KeelResult<Self> {
        let mut config = match Self::default_path() {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database.url = url;
        }
        Ok(config)
    }

    /// In-memory database, nothing else set.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }
}
