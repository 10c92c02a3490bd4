use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, RetryPolicy, DEFAULT_STALE_AFTER};
use crate::key::ResourceKind;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Server root; `/api/v1` is appended
  pub url: String,
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: DEFAULT_API_URL.to_string(),
      request_timeout_secs: 30,
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  pub stale_after_secs: u64,
  /// Per-kind staleness, e.g. `queue-list: 60`
  pub stale_after_overrides: HashMap<ResourceKind, u64>,
  pub max_retries: u32,
  pub retry_delay_ms: u64,
  pub max_retry_delay_ms: u64,
  pub fetch_timeout_secs: Option<u64>,
  pub max_entries: Option<usize>,
}

impl Default for CacheSettings {
  fn default() -> Self {
    let retry = RetryPolicy::default();
    Self {
      stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
      stale_after_overrides: HashMap::new(),
      max_retries: retry.max_retries,
      retry_delay_ms: retry.retry_delay.as_millis() as u64,
      max_retry_delay_ms: retry.max_retry_delay.as_millis() as u64,
      fetch_timeout_secs: Some(30),
      max_entries: None,
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(&self) -> CacheConfig {
    let mut config = CacheConfig::default()
      .with_stale_after(Duration::from_secs(self.stale_after_secs))
      .with_retry(RetryPolicy {
        max_retries: self.max_retries,
        retry_delay: Duration::from_millis(self.retry_delay_ms),
        max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
      });
    for (kind, secs) in &self.stale_after_overrides {
      config = config.with_stale_after_for(*kind, Duration::from_secs(*secs));
    }
    if let Some(secs) = self.fetch_timeout_secs {
      config = config.with_fetch_timeout(Duration::from_secs(secs));
    }
    if let Some(max) = self.max_entries {
      config = config.with_max_entries(max);
    }
    config
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qafka.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qafka/config.yaml
  ///
  /// Without a file, defaults apply. `QAFKA_API_URL` overrides the API URL.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var("QAFKA_API_URL") {
      if !url.trim().is_empty() {
        config.api.url = url;
      }
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("qafka.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qafka").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Directory for log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("qafka"))
  }
}
