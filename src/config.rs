//! Runtime settings for the backend connection and cache timings.
//!
//! Each value is resolved with priority `toeic.toml` > environment (a `.env`
//! file is loaded first if present) > default.
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:3000"
//! timeout_secs = 10
//! mock = false
//!
//! [cache]
//! stale_secs = 60
//! cache_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::query::QueryConfig;

pub const CONFIG_FILE: &str = "toeic.toml";

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STALE_SECS: u64 = 60;
pub const DEFAULT_CACHE_SECS: u64 = 60;

pub const ENV_API_URL: &str = "TOEIC_API_URL";
pub const ENV_API_TIMEOUT_SECS: &str = "TOEIC_API_TIMEOUT_SECS";
pub const ENV_API_MOCK: &str = "TOEIC_API_MOCK";
pub const ENV_STALE_SECS: &str = "TOEIC_CACHE_STALE_SECS";
pub const ENV_CACHE_SECS: &str = "TOEIC_CACHE_SECS";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Serve requests from the in-memory backend instead of `base_url`.
    pub mock: bool,
}

impl ApiSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            mock: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub stale_secs: u64,
    pub cache_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_secs: DEFAULT_STALE_SECS,
            cache_secs: DEFAULT_CACHE_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
}

/// `toeic.toml` layout; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api: Option<ApiFile>,
    cache: Option<CacheFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiFile {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    mock: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheFile {
    stale_secs: Option<u64>,
    cache_secs: Option<u64>,
}

impl Settings {
    /// Loads `.env`, then resolves settings from `toeic.toml` in the working
    /// directory and the process environment.
    ///
    /// # Errors
    ///
    /// Fails if `toeic.toml` exists but cannot be read or parsed, or if an
    /// environment variable holds an invalid value.
    pub fn load() -> Result<Self, SettingsError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();
        Self::load_from(Path::new(CONFIG_FILE), |name| std::env::var(name).ok())
    }

    /// Resolves settings from `path` (skipped when missing) and `env`.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        settings.apply_env(&env)?;

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let file: FileConfig = toml::from_str(&contents).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::info!("Using settings from {}", path.display());
                settings.apply_file(file);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        tracing::debug!(?settings, "Settings resolved");
        Ok(settings)
    }

    /// Cache timings as the query layer expects them.
    #[must_use]
    pub const fn query_config(&self) -> QueryConfig {
        QueryConfig::new(
            Duration::from_secs(self.cache.stale_secs),
            Duration::from_secs(self.cache.cache_secs),
        )
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), SettingsError> {
        if let Some(url) = env(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(secs) = parse_env(env, ENV_API_TIMEOUT_SECS)? {
            self.api.timeout_secs = secs;
        }
        if let Some(mock) = parse_env(env, ENV_API_MOCK)? {
            self.api.mock = mock;
        }
        if let Some(secs) = parse_env(env, ENV_STALE_SECS)? {
            self.cache.stale_secs = secs;
        }
        if let Some(secs) = parse_env(env, ENV_CACHE_SECS)? {
            self.cache.cache_secs = secs;
        }
        Ok(())
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(api) = file.api {
            if let Some(url) = api.base_url {
                self.api.base_url = url;
            }
            if let Some(secs) = api.timeout_secs {
                self.api.timeout_secs = secs;
            }
            if let Some(mock) = api.mock {
                self.api.mock = mock;
            }
        }
        if let Some(cache) = file.cache {
            if let Some(secs) = cache.stale_secs {
                self.cache.stale_secs = secs;
            }
            if let Some(secs) = cache.cache_secs {
                self.cache.cache_secs = secs;
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, SettingsError> {
    env(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| SettingsError::InvalidEnv { name, value })
        })
        .transpose()
}
