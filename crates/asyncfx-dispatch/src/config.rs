#![forbid(unsafe_code)]

//! Process-wide runtime configuration for the built-in dispatchers.
//!
//! The configuration is read once, the first time [`Dispatcher::platform`] or
//! [`Dispatcher::background`] is used. Call [`RuntimeConfig::install`] before
//! that point to override the environment-derived defaults.
//!
//! | Key | Environment variable |
//! |-----|----------------------|
//! | `platform_thread_name` | `ASYNCFX_PLATFORM_THREAD` |
//! | `background_thread_name` | `ASYNCFX_BACKGROUND_THREAD` |
//! | `background_threads` | `ASYNCFX_BACKGROUND_THREADS` |
//!
//! [`Dispatcher::platform`]: crate::Dispatcher::platform
//! [`Dispatcher::background`]: crate::Dispatcher::background

use std::env;
use std::sync::OnceLock;
use std::thread;

use tracing::warn;

pub const PLATFORM_THREAD_ENV: &str = "ASYNCFX_PLATFORM_THREAD";
pub const BACKGROUND_THREAD_ENV: &str = "ASYNCFX_BACKGROUND_THREAD";
pub const BACKGROUND_THREADS_ENV: &str = "ASYNCFX_BACKGROUND_THREADS";

static INSTALLED: OnceLock<RuntimeConfig> = OnceLock::new();

/// Errors raised while building or installing a [`RuntimeConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("runtime configuration is already installed")]
    AlreadyInstalled,
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[cfg(feature = "config-file")]
    #[error("failed to parse runtime configuration: {0}")]
    Parse(String),
}

/// Thread names and pool size for the built-in dispatchers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct RuntimeConfig {
    pub platform_thread_name: String,
    pub background_thread_name: String,
    pub background_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            platform_thread_name: "asyncfx-platform".to_owned(),
            background_thread_name: "asyncfx-background".to_owned(),
            background_threads: cores.max(2),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `ASYNCFX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = lookup(PLATFORM_THREAD_ENV).filter(|s| !s.trim().is_empty()) {
            config.platform_thread_name = name;
        }
        if let Some(name) = lookup(BACKGROUND_THREAD_ENV).filter(|s| !s.trim().is_empty()) {
            config.background_thread_name = name;
        }
        if let Some(raw) = lookup(BACKGROUND_THREADS_ENV) {
            config.background_threads = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: BACKGROUND_THREADS_ENV,
                        value: raw,
                    });
                }
            };
        }
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.background_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "background_threads",
                value: "0".to_owned(),
            });
        }
        Ok(config)
    }

    /// Pin this configuration for the rest of the process.
    ///
    /// Fails once a configuration is in place, including the implicit one
    /// created when a built-in dispatcher was first used.
    pub fn install(self) -> Result<(), ConfigError> {
        INSTALLED
            .set(self)
            .map_err(|_| ConfigError::AlreadyInstalled)
    }

    /// The active configuration.
    ///
    /// Falls back to [`RuntimeConfig::from_env`], and to the defaults when the
    /// environment holds invalid values.
    pub fn global() -> &'static RuntimeConfig {
        INSTALLED.get_or_init(|| {
            Self::from_env().unwrap_or_else(|err| {
                warn!(%err, "ignoring invalid runtime configuration from environment");
                Self::default()
            })
        })
    }
}
