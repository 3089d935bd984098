//! Configuration loading for Parley.
//!
//! Configuration lives at `~/.parley/config.toml`; every section and field
//! is optional and falls back to a default. Two environment variables
//! override the file: `PARLEY_BACKEND_URL` and `PARLEY_REQUEST_TIMEOUT_SECS`.

use std::time::Duration;
use std::{env, fs, path::PathBuf};

use serde::Deserialize;

const CONFIG_DIR: &str = ".parley";
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TITLE_LABEL: &str = "New conversation";
const DEFAULT_GREETING: &str = "Hello! How can I help you today?";

/// Greeting prefixes stripped when deriving a conversation title from the
/// first user message. Matched case-insensitively at the start of the text.
const DEFAULT_GREETING_PREFIXES: &[&str] = &[
    "xin chào",
    "chào bạn",
    "chào",
    "hello",
    "hi",
    "hey",
];

#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfig {
    pub backend: Option<BackendConfig>,
    pub store: Option<StoreConfig>,
    pub titles: Option<TitlesConfig>,
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the conversational backend.
    pub url: Option<String>,
    /// Reply deadline in seconds, measured from the moment the response
    /// stream opens.
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the conversation store. Defaults to the backend URL -
    /// the reference deployment serves both from one origin.
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TitlesConfig {
    /// Greeting prefixes stripped from the start of the first user message.
    pub greeting_prefixes: Option<Vec<String>>,
    /// Label used when no title can be derived.
    pub default_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatConfig {
    /// Placeholder greeting shown when a transcript cannot be fetched.
    pub greeting: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ParleyConfig {
    /// Default location: `~/.parley/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location. A missing file is not an error -
    /// defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }

    /// Backend base URL, after the `PARLEY_BACKEND_URL` override.
    #[must_use]
    pub fn backend_url(&self) -> String {
        if let Ok(url) = env::var("PARLEY_BACKEND_URL")
            && !url.trim().is_empty()
        {
            return url;
        }
        self.backend
            .as_ref()
            .and_then(|b| b.url.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_owned())
    }

    /// Store base URL; falls back to the backend URL.
    #[must_use]
    pub fn store_url(&self) -> String {
        self.store
            .as_ref()
            .and_then(|s| s.url.clone())
            .unwrap_or_else(|| self.backend_url())
    }

    /// Reply deadline, after the `PARLEY_REQUEST_TIMEOUT_SECS` override.
    /// Zero is treated as unset.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        let secs = env::var("PARLEY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .or_else(|| {
                self.backend
                    .as_ref()
                    .and_then(|b| b.request_timeout_secs)
                    .filter(|value| *value > 0)
            })
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn greeting_prefixes(&self) -> Vec<String> {
        self.titles
            .as_ref()
            .and_then(|t| t.greeting_prefixes.clone())
            .unwrap_or_else(|| {
                DEFAULT_GREETING_PREFIXES
                    .iter()
                    .map(|&p| p.to_owned())
                    .collect()
            })
    }

    #[must_use]
    pub fn default_title_label(&self) -> String {
        self.titles
            .as_ref()
            .and_then(|t| t.default_label.clone())
            .unwrap_or_else(|| DEFAULT_TITLE_LABEL.to_owned())
    }

    #[must_use]
    pub fn fallback_greeting(&self) -> String {
        self.chat
            .as_ref()
            .and_then(|c| c.greeting.clone())
            .unwrap_or_else(|| DEFAULT_GREETING.to_owned())
    }
}
