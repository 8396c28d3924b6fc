//! TOML configuration.
//!
//! ```toml
//! [backend]
//! base_url = "https://annotations.example.com/api"
//! timeout_secs = 30
//!
//! [session]
//! token_file = "./data/session.token"
//! ```
//!
//! `GTC_API_URL` overrides `backend.base_url`. The session token itself is
//! read by [`crate::session::Session::init`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding `backend.base_url`.
pub const API_URL_ENV: &str = "GTC_API_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    /// Where the bearer token is persisted between invocations.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl Config {
    /// A config for running without a file, pointed at `base_url`.
    pub fn minimal(base_url: &str) -> Self {
        Self {
            backend: BackendConfig {
                base_url: base_url.to_string(),
                timeout_secs: default_timeout_secs(),
            },
            session: SessionConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content, std::env::var(API_URL_ENV).ok())
}

/// Parse and validate config text, applying an optional base URL override.
pub fn parse_config(content: &str, api_url_override: Option<String>) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Some(url) = api_url_override.filter(|u| !u.trim().is_empty()) {
        config.backend.base_url = url;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let url = config.backend.base_url.trim();
    if url.is_empty() {
        anyhow::bail!("backend.base_url must not be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!(
            "backend.base_url must start with http:// or https:// (got '{}')",
            url
        );
    }
    if config.backend.timeout_secs == 0 {
        anyhow::bail!("backend.timeout_secs must be > 0");
    }
    Ok(())
}
