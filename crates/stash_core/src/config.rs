//! Configuration for the stream stash
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working, fail-closed configuration.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::allow_list::AllowList;
use crate::error::{ConfigError, StashError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub fallback: FallbackConfig,
    pub allow_list: AllowListConfig,
    pub events: EventConfig,
}

/// Presentation and batching of the curated fallback bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub bundle_title: String,
    pub cluster_title: String,
    pub cluster_subtitle: String,
    /// Maximum detail lookups in flight during synthesis
    pub lookup_concurrency: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            bundle_title: "Recommended".to_string(),
            cluster_title: "Curated picks".to_string(),
            cluster_subtitle: "Selected from the allow-list".to_string(),
            lookup_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowListConfig {
    /// Built-in identifier set, the last layer of the allow-list fallback
    pub identifiers: Vec<String>,
    /// On-disk cache for the refreshable allow-list
    pub cache_path: Option<PathBuf>,
    /// Age after which the refreshable allow-list counts as stale
    pub stale_after_secs: u64,
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self {
            identifiers: Vec::new(),
            cache_path: None,
            stale_after_secs: 24 * 60 * 60,
        }
    }
}

impl AllowListConfig {
    pub fn builtin(&self) -> AllowList {
        AllowList::new(self.identifiers.iter().map(String::as_str))
    }

    pub fn stale_after(&self) -> TimeDelta {
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast channel capacity for stash events
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl StashConfig {
    /// Reject values that would make the stash unusable.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.fallback.lookup_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fallback.lookup_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "events.capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve a path relative to a base directory
/// If the path is absolute, return it as-is
fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<StashConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        StashError::configuration(
            path.display().to_string(),
            "file",
            "readable TOML file",
            ConfigError::Io(e.to_string()),
        )
    })?;

    let mut config: StashConfig = toml::from_str(&content).map_err(|e| {
        StashError::configuration(
            path.display().to_string(),
            "content",
            "valid TOML configuration",
            ConfigError::TomlParse(e.to_string()),
        )
    })?;

    config.validate().map_err(|cause| {
        let field = match &cause {
            ConfigError::InvalidValue { field, .. } => field.clone(),
            _ => "content".to_string(),
        };
        StashError::configuration(path.display().to_string(), field, "a positive value", cause)
    })?;

    // Resolve the allow-list cache relative to the config file's directory
    let base_dir = path.parent().unwrap_or(Path::new("."));
    if let Some(cache_path) = config.allow_list.cache_path.as_mut() {
        *cache_path = resolve_path(base_dir, cache_path);
    }

    Ok(config)
}

/// Load configuration from `path` if given and present, defaults otherwise
pub async fn load_config_or_default(path: Option<&Path>) -> Result<StashConfig> {
    match path {
        Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => {
            load_config(path).await
        }
        Some(path) => {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(StashConfig::default())
        }
        None => Ok(StashConfig::default()),
    }
}

/// Save configuration to a TOML file
pub async fn save_config(config: &StashConfig, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StashError::configuration(
                parent.display().to_string(),
                "directory",
                "writable directory",
                ConfigError::Io(e.to_string()),
            )
        })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| {
        StashError::configuration(
            path.display().to_string(),
            "serialization",
            "serializable config structure",
            ConfigError::TomlSerialize(e.to_string()),
        )
    })?;

    tokio::fs::write(path, content).await.map_err(|e| {
        StashError::configuration(
            path.display().to_string(),
            "file",
            "writable file location",
            ConfigError::Io(e.to_string()),
        )
    })?;

    Ok(())
}
