//! core::config::schema
//!
//! Configuration file schema.
//!
//! Every field is optional at the TOML level; [`super::Config::load`] applies
//! defaults and validation and produces an immutable
//! [`super::ProjectSettings`].
//!
//! # Example
//!
//! ```toml
//! [repository]
//! url = "/srv/git/app.git"
//! remote = "origin"
//!
//! [branches]
//! include = "master, feature/*"
//! exclude = "wip/*"
//!
//! [workspace]
//! root = "/var/lib/gitscm/app"
//! clean = true
//!
//! [publish]
//! enabled = true
//! merge_target = "integrate"
//! max_attempts = 5
//!
//! [identity]
//! name = "CI"
//! email = "ci@example.com"
//!
//! [polling]
//! timeout_secs = 600
//! tie_break = "last-built"
//! history_limit = 20
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Raw project configuration as read from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub repository: RepositoryConfig,
    pub branches: BranchesConfig,
    pub workspace: WorkspaceConfig,
    pub publish: PublishConfig,
    pub identity: Option<IdentityConfig>,
    pub polling: PollingConfig,
}

impl ProjectConfig {
    /// Validate values that can be checked without resolving anything.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.repository.url.as_deref() {
            None => {
                return Err(ConfigError::InvalidValue(
                    "repository.url is required".to_string(),
                ))
            }
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "repository.url cannot be empty".to_string(),
                ))
            }
            Some(_) => {}
        }

        if let Some(remote) = &self.repository.remote {
            if remote.is_empty() || remote.contains(['/', ' ']) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid remote name '{remote}'"
                )));
            }
        }

        if self.workspace.root.is_none() {
            return Err(ConfigError::InvalidValue(
                "workspace.root is required".to_string(),
            ));
        }

        self.publish.validate()?;

        if self.polling.history_limit == Some(0) {
            return Err(ConfigError::InvalidValue(
                "polling.history_limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Where the project's sources come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Remote repository URL (or path)
    pub url: Option<String>,

    /// Remote name (default: "origin")
    pub remote: Option<String>,
}

/// Which refs to track.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BranchesConfig {
    /// Patterns to track; empty or absent tracks every branch and tag
    pub include: Option<String>,

    /// Patterns never to track
    pub exclude: Option<String>,
}

/// Local workspace settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Project directory; relative paths resolve against the config file
    pub root: Option<String>,

    /// Clean the workspace before each build (default: false)
    pub clean: Option<bool>,
}

/// Post-build publishing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Enable publishing (default: true if merge_target is set)
    pub enabled: Option<bool>,

    /// Integration branch to merge into and push
    pub merge_target: Option<String>,

    /// Attempts before a contended publish fails (default: 5)
    pub max_attempts: Option<u32>,
}

impl PublishConfig {
    /// Default number of publish attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Whether publishing is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(self.merge_target.is_some())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_enabled() && self.merge_target.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidValue(
                "publish.merge_target is required when publishing is enabled".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue(
                "publish.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity for commits created by gitscm.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Defaults to `name`
    pub committer_name: Option<String>,
    /// Defaults to `email`
    pub committer_email: Option<String>,
}

/// Polling and candidate selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    /// Per-operation timeout in seconds (default: 600; 0 disables)
    pub timeout_secs: Option<u64>,

    /// Candidate choice when several refs changed
    pub tie_break: Option<TieBreak>,

    /// Revisions remembered per ref (default: 20)
    pub history_limit: Option<usize>,
}

/// How the poller picks one candidate among several changed refs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The ref built last, if it changed; otherwise the smallest ref name
    #[default]
    LastBuilt,
    /// Always the smallest full ref name
    Lexicographic,
}
