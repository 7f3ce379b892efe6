//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Each project is described by one TOML file (see [`schema`] for the
//! layout). [`Config::load`] reads it, applies defaults, validates every
//! value and produces an immutable [`ProjectSettings`] that the engine
//! borrows for the lifetime of an operation.
//!
//! # Precedence
//!
//! 1. Default values
//! 2. The project file
//! 3. For the commit identity only: signatures supplied by the caller
//!    (the CLI reads them from `GIT_AUTHOR_*` / `GIT_COMMITTER_*`) when the
//!    file has no `[identity]` section
//!
//! Relative `workspace.root` paths resolve against the directory holding the
//! config file.
//!
//! # Example
//!
//! ```no_run
//! use gitscm::core::config::Config;
//! use std::path::Path;
//!
//! let settings = Config::load(Path::new("/etc/gitscm/app.toml"), None).unwrap();
//! println!("tracking {} from {}", settings.branches, settings.url);
//! ```

pub mod schema;

pub use schema::{ProjectConfig, TieBreak};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::cancel::{CancelToken, OpContext};
use crate::core::paths::ProjectPaths;
use crate::core::spec::{BranchSpec, ExclusionSpec};
use crate::core::types::{Identity, Signatures, TrackedRef, TypeError};

/// Remote name used when none is configured.
pub const DEFAULT_REMOTE: &str = "origin";

/// Per-operation timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Revisions remembered per ref when no limit is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Resolved publishing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    /// The integration branch on the remote.
    pub merge_target: TrackedRef,
    pub max_attempts: u32,
}

/// Validated, immutable settings for one project.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub url: String,
    pub remote: String,
    pub branches: BranchSpec,
    pub exclude: ExclusionSpec,
    pub paths: ProjectPaths,
    pub clean_before_build: bool,
    /// None when publishing is disabled.
    pub publish: Option<PublishSettings>,
    pub signatures: Signatures,
    /// None disables the per-operation deadline.
    pub timeout: Option<Duration>,
    pub tie_break: TieBreak,
    pub history_limit: usize,
}

impl ProjectSettings {
    /// Settings with every optional value at its default.
    ///
    /// Tracks all refs of `origin`, never publishes, and commits as
    /// `gitscm <gitscm@localhost>`.
    pub fn new(url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            remote: DEFAULT_REMOTE.to_string(),
            branches: BranchSpec::empty(),
            exclude: ExclusionSpec::empty(),
            paths: ProjectPaths::new(root),
            clean_before_build: false,
            publish: None,
            signatures: Signatures::single(default_identity()),
            timeout: Some(DEFAULT_TIMEOUT),
            tie_break: TieBreak::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// An operation context bounded by the configured timeout.
    pub fn context(&self, token: CancelToken) -> OpContext {
        let ctx = OpContext::new(token);
        match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

fn default_identity() -> Identity {
    Identity {
        name: "gitscm".to_string(),
        email: "gitscm@localhost".to_string(),
    }
}

/// Loader for project configuration files.
pub struct Config;

impl Config {
    /// Load and validate the project file at `path`.
    ///
    /// `fallback_signatures` is used when the file has no `[identity]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed, or
    /// contains an invalid value.
    pub fn load(
        path: &Path,
        fallback_signatures: Option<Signatures>,
    ) -> Result<ProjectSettings, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: ProjectConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve(config, base_dir, fallback_signatures)
    }

    /// Validate a parsed file and apply defaults.
    pub fn resolve(
        config: ProjectConfig,
        base_dir: &Path,
        fallback_signatures: Option<Signatures>,
    ) -> Result<ProjectSettings, ConfigError> {
        config.validate()?;

        let remote = config
            .repository
            .remote
            .unwrap_or_else(|| DEFAULT_REMOTE.to_string());

        let branches = parse_spec(config.branches.include.as_deref(), &remote, "branches.include")?;
        let exclude = parse_spec(config.branches.exclude.as_deref(), &remote, "branches.exclude")?;

        let root = PathBuf::from(config.workspace.root.unwrap_or_default());
        let root = if root.is_absolute() {
            root
        } else {
            base_dir.join(root)
        };

        let signatures = match config.identity {
            Some(identity) => Some(resolve_identity(identity)?),
            None => fallback_signatures,
        };

        let publish = if config.publish.is_enabled() {
            let target = config.publish.merge_target.unwrap_or_default();
            let merge_target = TrackedRef::branch(target.as_str()).map_err(|e| {
                ConfigError::InvalidValue(format!("publish.merge_target '{target}': {e}"))
            })?;
            if signatures.is_none() {
                return Err(ConfigError::InvalidValue(
                    "publishing requires an [identity] section or GIT_AUTHOR_NAME/GIT_AUTHOR_EMAIL"
                        .to_string(),
                ));
            }
            Some(PublishSettings {
                merge_target,
                max_attempts: config
                    .publish
                    .max_attempts
                    .unwrap_or(schema::PublishConfig::DEFAULT_MAX_ATTEMPTS),
            })
        } else {
            None
        };

        let timeout = match config.polling.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_TIMEOUT),
        };

        Ok(ProjectSettings {
            url: config.repository.url.unwrap_or_default(),
            remote,
            branches,
            exclude,
            paths: ProjectPaths::new(root),
            clean_before_build: config.workspace.clean.unwrap_or(false),
            publish,
            signatures: signatures.unwrap_or_else(|| Signatures::single(default_identity())),
            timeout,
            tie_break: config.polling.tie_break.unwrap_or_default(),
            history_limit: config
                .polling
                .history_limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
        })
    }
}

fn parse_spec(input: Option<&str>, remote: &str, field: &str) -> Result<BranchSpec, ConfigError> {
    match input {
        Some(input) => BranchSpec::parse(input, remote)
            .map_err(|e| ConfigError::InvalidValue(format!("{field}: {e}"))),
        None => Ok(BranchSpec::empty()),
    }
}

fn resolve_identity(identity: schema::IdentityConfig) -> Result<Signatures, ConfigError> {
    let invalid = |e: TypeError| ConfigError::InvalidValue(format!("identity: {e}"));

    let (Some(name), Some(email)) = (identity.name, identity.email) else {
        return Err(ConfigError::InvalidValue(
            "identity requires both name and email".to_string(),
        ));
    };

    let author = Identity::new(name.as_str(), email.as_str()).map_err(invalid)?;
    let committer = Identity::new(
        identity.committer_name.unwrap_or(name),
        identity.committer_email.unwrap_or(email),
    )
    .map_err(invalid)?;

    Ok(Signatures { author, committer })
}
