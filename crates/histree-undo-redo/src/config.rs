//! Tracker configuration
//!
//! Loaded from TOML or JSON, with `HISTREE_*` environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, UndoRedoError};

const ENV_TRACKING_ENABLED: &str = "HISTREE_TRACKING_ENABLED";
const ENV_MERGE_ON_THE_GO: &str = "HISTREE_MERGE_ON_THE_GO";
const ENV_MERGE_ON_COMMIT: &str = "HISTREE_MERGE_ON_COMMIT";
const ENV_COMMIT_EMPTY: &str = "HISTREE_COMMIT_EMPTY";

/// Behaviour switches for a [`ChangeTracker`](crate::ChangeTracker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Record changes at all
    pub tracking_enabled: bool,
    /// Re-merge the open changeset after every appended change
    pub merge_on_the_go: bool,
    /// Merge flag used by `commit_default`
    pub merge_on_commit: bool,
    /// Commit-empty flag used by `commit_default`
    pub commit_empty: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            merge_on_the_go: false,
            merge_on_commit: false,
            commit_empty: false,
        }
    }
}

impl TrackerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            other => {
                return Err(UndoRedoError::config_error(format!(
                    "unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), ?config, "Loaded tracker config");
        Ok(config)
    }

    /// Apply `HISTREE_*` environment variables on top of this config
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let flags: [(&str, &mut bool); 4] = [
            (ENV_TRACKING_ENABLED, &mut self.tracking_enabled),
            (ENV_MERGE_ON_THE_GO, &mut self.merge_on_the_go),
            (ENV_MERGE_ON_COMMIT, &mut self.merge_on_commit),
            (ENV_COMMIT_EMPTY, &mut self.commit_empty),
        ];
        for (key, slot) in flags {
            if let Some(raw) = lookup(key) {
                *slot = parse_flag(key, &raw)?;
            }
        }
        Ok(self)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| UndoRedoError::config_error(format!("failed to render config: {}", e)))
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(UndoRedoError::config_error(format!(
            "{} must be a boolean, got {:?}",
            key, raw
        ))),
    }
}
