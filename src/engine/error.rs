//! engine::error
//!
//! Errors reported by polls, builds and publishes.
//!
//! Every error names the operation that failed so callers can always tell
//! "no changes" apart from "could not tell". Nothing in the engine turns an
//! error into an empty poll result.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::cancel::Interrupted;
use crate::core::config::ConfigError;
use crate::core::ops::lock::LockError;
use crate::core::state::StoreError;
use crate::git::GitError;

/// Broad category of an [`ScmError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fetch or push could not reach the remote. Not retried.
    Transport,
    /// The integration ref could not be updated without losing work.
    Conflict,
    /// Settings are unusable.
    Configuration,
    /// The workspace is missing or not in a usable state.
    WorkspaceState,
    Cancelled,
    TimedOut,
    /// Local failures: state file, lock file, git internals.
    Internal,
}

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("{operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: GitError,
    },

    #[error("publishing to {target} failed after {attempts} attempt(s): {message}")]
    Conflict {
        target: String,
        attempts: u32,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{operation}: {message}")]
    WorkspaceState {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: String,
        timeout: Duration,
    },

    #[error("workspace lock: {0}")]
    Lock(LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no tracked ref to build")]
    NoCandidate,

    #[error("{operation}: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: GitError,
    },
}

impl ScmError {
    /// Attach an operation name to a client error and categorise it.
    pub fn git(operation: &'static str, err: GitError) -> Self {
        match err {
            GitError::Transport { .. } => ScmError::Transport {
                operation,
                source: err,
            },
            GitError::Cancelled { operation } => ScmError::Cancelled { operation },
            GitError::TimedOut { operation, timeout } => ScmError::TimedOut { operation, timeout },
            GitError::WorkspaceMissing { path } => ScmError::WorkspaceState {
                operation,
                message: format!("workspace does not exist: {}", path.display()),
            },
            other => ScmError::Git {
                operation,
                source: other,
            },
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScmError::Transport { .. } => ErrorKind::Transport,
            ScmError::Conflict { .. } => ErrorKind::Conflict,
            ScmError::Configuration(_) | ScmError::NoCandidate => ErrorKind::Configuration,
            ScmError::WorkspaceState { .. } => ErrorKind::WorkspaceState,
            ScmError::Cancelled { .. } => ErrorKind::Cancelled,
            ScmError::TimedOut { .. } => ErrorKind::TimedOut,
            ScmError::Lock(_) | ScmError::Store(_) | ScmError::Git { .. } => ErrorKind::Internal,
        }
    }
}

impl From<Interrupted> for ScmError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::Cancelled { operation } => ScmError::Cancelled { operation },
            Interrupted::TimedOut { operation, timeout } => {
                ScmError::TimedOut { operation, timeout }
            }
        }
    }
}

impl From<LockError> for ScmError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Interrupted(interrupted) => interrupted.into(),
            other => ScmError::Lock(other),
        }
    }
}

impl From<ConfigError> for ScmError {
    fn from(err: ConfigError) -> Self {
        ScmError::Configuration(err.to_string())
    }
}
