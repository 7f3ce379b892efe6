//! engine::runner
//!
//! In-process build lifecycle: prepare, build step, finish, publish.
//!
//! # Invariants
//!
//! - The build step runs while the workspace lock is held
//! - Failed builds are never recorded and never published
//! - A publish failure is reported after the build itself was recorded; the
//!   build succeeded, only its publication did not
//! - Checkout and publish each get the full timeout; the build step itself
//!   is not bounded by it

use serde::Serialize;
use tracing::info;

use crate::core::cancel::OpContext;
use crate::core::config::ProjectSettings;
use crate::core::types::Branch;
use crate::git::RepositoryClient;

use super::build::{BuildOutcome, Builder, Culprit, PreparedBuild};
use super::error::ScmError;
use super::publish::{PublishOutcome, Publisher};
use super::{PostBuildAction, RevisionCheckout};

/// What one run of [`run_build`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub candidate: Branch,
    pub culprits: Vec<Culprit>,
    pub outcome: BuildOutcome,
    /// None when the build failed or publishing is disabled.
    pub published: Option<PublishOutcome>,
}

/// Run one build of `candidate` (or a resolved candidate when `None`).
///
/// `build_step` runs against the checked-out workspace and may commit to it;
/// those commits are what gets published.
///
/// # Errors
///
/// Any error from checkout, recording or publishing. The build step itself
/// reports failure through its [`BuildOutcome`].
pub fn run_build<C, F>(
    settings: &ProjectSettings,
    client: &C,
    candidate: Option<&Branch>,
    build_number: u64,
    ctx: &OpContext,
    build_step: F,
) -> Result<BuildReport, ScmError>
where
    C: RepositoryClient + ?Sized,
    F: FnOnce(&C, &PreparedBuild) -> BuildOutcome,
{
    let builder = Builder::new(settings, client);
    let prepared = builder.prepare(candidate, ctx)?;
    let candidate = prepared.candidate.clone();
    let culprits = prepared.culprits.clone();

    let outcome = build_step(client, &prepared);
    info!(reference = %candidate.reference, build_number, ?outcome, "build step finished");
    builder.finish(prepared, outcome, build_number)?;

    let published = match (outcome, settings.publish.is_some()) {
        (BuildOutcome::Success, true) => {
            let ctx = ctx.restarted();
            Some(Publisher::new(settings, client)?.perform(&candidate, build_number, &ctx)?)
        }
        _ => None,
    };

    Ok(BuildReport {
        candidate,
        culprits,
        outcome,
        published,
    })
}
