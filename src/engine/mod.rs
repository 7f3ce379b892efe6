//! engine
//!
//! Change detection, build checkout and publishing for one project.
//!
//! # Architecture
//!
//! The engine exposes three narrow interfaces, composed by an external
//! scheduler through plain calls:
//!
//! 1. [`ChangeSource`]: poll the remote and report whether a tracked ref
//!    changed since it was last built ([`Poller`])
//! 2. [`RevisionCheckout`]: check out the exact candidate revision for a build
//!    and record the outcome ([`Builder`])
//! 3. [`PostBuildAction`]: publish the build's commits to the integration ref
//!    ([`Publisher`])
//!
//! [`runner::run_build`] strings the last two together for callers that run
//! the build step in-process.
//!
//! Every implementation borrows an immutable [`ProjectSettings`] and a
//! [`RepositoryClient`]; none of them reads process-global state.
//!
//! # Lifecycle
//!
//! ```text
//! poll ──► prepare ──► (build step) ──► finish ──► publish
//! ```
//!
//! # Invariants
//!
//! - Polls, builds and publishes of one project hold the workspace lock
//! - The build state store changes only after an operation fully succeeds
//! - A failure is always an error, never an empty poll result
//! - Publishing never force-pushes
//!
//! # Example
//!
//! ```
//! use gitscm::core::cancel::OpContext;
//! use gitscm::core::config::ProjectSettings;
//! use gitscm::core::types::Identity;
//! use gitscm::engine::{BuildOutcome, Builder, ChangeSource, Poller, RevisionCheckout};
//! use gitscm::git::FakeRemote;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let settings = ProjectSettings::new("fake://remote", dir.path());
//! let remote = FakeRemote::new();
//! let alice = Identity::new("Alice", "alice@example.com").unwrap();
//! remote.commit("master", &alice, "initial");
//!
//! let client = remote.client();
//! let ctx = OpContext::unbounded();
//! let builder = Builder::new(&settings, &client);
//! let build = builder.prepare(None, &ctx).unwrap();
//! builder.finish(build, BuildOutcome::Success, 1).unwrap();
//!
//! let result = Poller::new(&settings, &client).poll(&ctx).unwrap();
//! assert!(!result.has_changes);
//! ```
//!
//! [`ProjectSettings`]: crate::core::config::ProjectSettings
//! [`RepositoryClient`]: crate::git::RepositoryClient

pub mod build;
pub mod error;
pub mod poll;
pub mod publish;
pub mod runner;

pub use build::{BuildOutcome, Builder, Culprit, PreparedBuild};
pub use error::{ErrorKind, ScmError};
pub use poll::{ChangeKind, PollResult, Poller, RefChange};
pub use publish::{PublishOutcome, Publisher};
pub use runner::{run_build, BuildReport};

use crate::core::cancel::OpContext;
use crate::core::types::Branch;

/// Reports whether anything new is waiting to be built.
pub trait ChangeSource {
    fn poll(&self, ctx: &OpContext) -> Result<PollResult, ScmError>;
}

/// Puts the workspace at a build's revision and records how the build went.
pub trait RevisionCheckout {
    /// Check out `candidate`, or resolve one when `None`.
    ///
    /// The returned build holds the workspace lock until [`finish`] consumes
    /// it.
    ///
    /// [`finish`]: RevisionCheckout::finish
    fn prepare(&self, candidate: Option<&Branch>, ctx: &OpContext) -> Result<PreparedBuild, ScmError>;

    /// Record the outcome. Only [`BuildOutcome::Success`] changes stored state.
    fn finish(
        &self,
        build: PreparedBuild,
        outcome: BuildOutcome,
        build_number: u64,
    ) -> Result<(), ScmError>;
}

/// Runs after a successful build.
pub trait PostBuildAction {
    fn perform(
        &self,
        built: &Branch,
        build_number: u64,
        ctx: &OpContext,
    ) -> Result<PublishOutcome, ScmError>;
}
