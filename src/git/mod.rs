//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! The engine depends only on the [`RepositoryClient`] trait. Direct use of
//! `git2` is confined to [`GitWorkspace`]; no other module imports it.
//!
//! # Responsibilities
//!
//! - Workspace creation and remote configuration
//! - Fetching and listing remote branches and tags
//! - Exact-revision checkout and cleaning
//! - Ancestry and history queries (is-ancestor, commits between)
//! - Commits, branches, tags and merge commits with explicit identities
//! - Non-forced pushes that report non-fast-forward rejections distinctly
//! - Raw `git` invocations with identity passed to the child process only
//!
//! # Invariants
//!
//! - Pushes never carry `+`; a rejected update is an error, never a retry here
//! - Remote operations honour the caller's cancellation and deadline; stalled
//!   connections are bounded by [`set_transport_timeout`]
//! - All operations return strong types (CommitId, TrackedRef, Branch)

mod client;
pub mod fake;
mod interface;

pub use client::{CommandOutput, CommitInfo, GitError, RepositoryClient};
pub use fake::{FailOn, FakeClient, FakeOperation, FakeRemote};
pub use interface::{set_transport_timeout, GitWorkspace};
