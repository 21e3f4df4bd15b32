//! Runtime configuration.
//!
//! Loaded from JSON; every field has a default so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read configuration {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Document could not be decoded
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How a configured team executes its jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    /// Dedicated OS worker threads
    #[default]
    Worker,
    /// Queue drained explicitly by the owner
    Manual,
}

/// One configured team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Team name, as referenced by work units
    pub name: String,
    /// Worker thread count (ignored for manual teams)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Execution strategy
    #[serde(default)]
    pub kind: TeamKind,
}

fn default_workers() -> usize {
    1
}

impl TeamConfig {
    /// Worker team with the given thread count
    #[must_use]
    pub fn worker(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            kind: TeamKind::Worker,
        }
    }

    /// Manually drained team
    #[must_use]
    pub fn manual(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 0,
            kind: TeamKind::Manual,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Teams created when the office is built
    pub teams: Vec<TeamConfig>,
    /// Nodes a dispatcher runs inline before bouncing through its team queue
    pub max_inline_nodes: usize,
    /// Collect node-level profiling records
    pub profile: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            teams: Vec::new(),
            max_inline_nodes: 64,
            profile: false,
        }
    }
}

impl RuntimeConfig {
    /// Decode configuration from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Add a team
    #[must_use]
    pub fn with_team(mut self, team: TeamConfig) -> Self {
        self.teams.push(team);
        self
    }

    /// Set the inline node budget
    #[must_use]
    pub fn with_max_inline_nodes(mut self, max: usize) -> Self {
        self.max_inline_nodes = max.max(1);
        self
    }

    /// Enable or disable profiling
    #[must_use]
    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.max_inline_nodes, 64);
        assert!(!config.profile);
    }

    #[test]
    fn test_config_teams() {
        let json = r#"{"teams": [{"name": "fast", "workers": 4}, {"name": "test", "kind": "manual"}]}"#;
        let config = RuntimeConfig::from_json_str(json).unwrap();
        assert_eq!(config.teams[0], TeamConfig::worker("fast", 4));
        assert_eq!(config.teams[1].kind, TeamKind::Manual);
        assert_eq!(config.teams[1].workers, 1);
    }

    #[test]
    fn test_config_parse_error() {
        assert!(matches!(
            RuntimeConfig::from_json_str("{\"profile\": 3}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_config_missing_file() {
        let err = RuntimeConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_inline_budget_at_least_one() {
        assert_eq!(RuntimeConfig::default().with_max_inline_nodes(0).max_inline_nodes, 1);
    }
}
