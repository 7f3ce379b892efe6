//! git::client
//!
//! The narrow interface through which the engine talks to git.
//!
//! # Architecture
//!
//! Everything the poller, build checkout and publisher need from git goes
//! through [`RepositoryClient`]. Two implementations exist:
//!
//! - [`crate::git::GitWorkspace`] drives a real on-disk workspace with `git2`
//!   (and the `git` binary for [`RepositoryClient::run_raw`])
//! - [`crate::git::FakeClient`] works against an in-memory commit graph for
//!   engine unit tests
//!
//! A client is bound to one workspace. Operations that talk to a remote take
//! an [`OpContext`] and must give up promptly once it is cancelled or its
//! deadline passes.
//!
//! # Identity
//!
//! Commits, tags and merges take the author and committer explicitly as
//! [`Signatures`]. Clients never read identity from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::cancel::{Interrupted, OpContext};
use crate::core::types::{Branch, CommitId, Signatures, TrackedRef, TypeError};

/// Errors from repository clients.
///
/// The categories matter to callers: transport failures and rejected pushes
/// are handled differently by the publisher, and a missing workspace is a
/// state error rather than a failure of git itself.
#[derive(Debug, Error)]
pub enum GitError {
    /// Talking to the remote failed (network, auth, missing remote).
    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    /// The remote refused an update that is not a fast-forward.
    #[error("push to {target} rejected as non-fast-forward: {message}")]
    NonFastForward { target: String, message: String },

    /// A merge produced content conflicts.
    #[error("merging {theirs} into {ours} produced conflicts")]
    MergeConflict { ours: String, theirs: String },

    /// The workspace has not been created yet.
    #[error("workspace does not exist: {path}")]
    WorkspaceMissing { path: PathBuf },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: String },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid { oid: String },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName { message: String },

    /// A raw git command exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: String,
        timeout: Duration,
    },

    /// The client cannot perform this operation.
    #[error("{operation} is not supported by this client")]
    Unsupported { operation: String },

    /// Any other git failure.
    #[error("git error: {message}")]
    Internal { message: String },
}

impl From<Interrupted> for GitError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::Cancelled { operation } => GitError::Cancelled { operation },
            Interrupted::TimedOut { operation, timeout } => {
                GitError::TimedOut { operation, timeout }
            }
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidCommitId(msg) => GitError::InvalidOid { oid: msg },
            TypeError::InvalidRefName(msg) => GitError::InvalidRefName { message: msg },
            TypeError::InvalidIdentity(msg) => GitError::Internal { message: msg },
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Information about a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    /// First line of the commit message
    pub summary: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<Utc>,
}

/// Captured result of a raw git command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Git operations on one workspace.
///
/// Methods take `&self`; implementations open whatever handles they need per
/// call, so a client can be shared between the poller and the build of the
/// same project (the workspace lock serialises them).
pub trait RepositoryClient {
    /// True once the workspace has been initialised.
    fn workspace_exists(&self) -> bool;

    /// Create an empty, non-bare workspace. Idempotent.
    fn init(&self) -> Result<(), GitError>;

    /// Create an empty bare repository at the workspace location.
    fn init_bare(&self) -> Result<(), GitError>;

    /// Point `name` at `url`, creating the remote if needed.
    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// Refresh remote-tracking branches and tags from `remote`.
    ///
    /// Branches land under `refs/remotes/<remote>/`, tags are force-updated
    /// under `refs/tags/`, and refs deleted on the remote are pruned.
    fn fetch(&self, remote: &str, ctx: &OpContext) -> Result<(), GitError>;

    /// The remote's branches and tags as last fetched, tags peeled to commits.
    fn list_branches(&self, remote: &str) -> Result<Vec<Branch>, GitError>;

    /// Check out exactly `revision` with a detached HEAD.
    fn checkout(&self, revision: &CommitId) -> Result<(), GitError>;

    /// Discard local modifications and untracked files.
    fn clean(&self) -> Result<(), GitError>;

    /// The commit HEAD points at, or None on an unborn branch.
    fn head(&self) -> Result<Option<CommitId>, GitError>;

    /// True if `ancestor` is reachable from `descendant` (or equal to it).
    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError>;

    /// Commits reachable from `tip` but not from `base`, newest first.
    fn commits_between(
        &self,
        base: Option<&CommitId>,
        tip: &CommitId,
    ) -> Result<Vec<CommitInfo>, GitError>;

    /// Stage `paths` (relative to the workspace root).
    fn add(&self, paths: &[&str]) -> Result<(), GitError>;

    /// Commit the index on top of HEAD and move HEAD to the new commit.
    fn commit(&self, message: &str, signatures: &Signatures) -> Result<CommitId, GitError>;

    /// Create or move a local branch.
    fn branch(&self, name: &str, revision: &CommitId) -> Result<(), GitError>;

    /// Create a tag; annotated when `message` is given.
    fn tag(
        &self,
        name: &str,
        revision: &CommitId,
        message: Option<&str>,
        signatures: &Signatures,
        force: bool,
    ) -> Result<(), GitError>;

    /// Create a merge commit with parents `[ours, theirs]` without touching HEAD.
    ///
    /// # Errors
    ///
    /// [`GitError::MergeConflict`] if the trees cannot be merged cleanly.
    fn merge(
        &self,
        ours: &CommitId,
        theirs: &CommitId,
        message: &str,
        signatures: &Signatures,
    ) -> Result<CommitId, GitError>;

    /// Update `target` on `remote` to `revision`. Never forced.
    ///
    /// # Errors
    ///
    /// [`GitError::NonFastForward`] if the remote ref moved elsewhere.
    fn push(
        &self,
        remote: &str,
        revision: &CommitId,
        target: &TrackedRef,
        ctx: &OpContext,
    ) -> Result<(), GitError>;

    /// Run `git <args>` in the workspace.
    ///
    /// `signatures` is passed to the child process as `GIT_AUTHOR_*` and
    /// `GIT_COMMITTER_*`.
    fn run_raw(
        &self,
        args: &[&str],
        signatures: &Signatures,
        ctx: &OpContext,
    ) -> Result<CommandOutput, GitError>;
}
