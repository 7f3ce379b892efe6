//! engine::poll
//!
//! The poller: decides whether a project has anything new to build.
//!
//! # Algorithm
//!
//! 1. If the workspace has never been created, report no changes. Only a
//!    build materialises a workspace.
//! 2. Fetch from the remote under the workspace lock.
//! 3. Select the tracked refs from the fresh listing.
//! 4. Compare every tracked ref against its [`BuildRecord`].
//! 5. Pick one candidate among the changed refs by the configured tie-break.
//!
//! A fetch failure is an error. It is never reported as "no changes".
//!
//! [`BuildRecord`]: crate::core::state::BuildRecord

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::cancel::OpContext;
use crate::core::config::schema::TieBreak;
use crate::core::config::ProjectSettings;
use crate::core::ops::lock::WorkspaceLock;
use crate::core::select::select;
use crate::core::state::BuildStateStore;
use crate::core::types::{Branch, CommitId, TrackedRef};
use crate::git::{GitError, RepositoryClient};

use super::error::ScmError;
use super::ChangeSource;

/// How a tracked ref differs from what was last built under its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Never built under this name.
    New,
    /// Moved forward from the last built revision.
    FastForward,
    /// Moved anywhere else: a retargeted tag or a force-pushed branch.
    Retargeted,
}

/// One tracked ref with an outstanding change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefChange {
    #[serde(rename = "ref")]
    pub reference: TrackedRef,
    /// Last revision built under this ref name.
    pub previous: Option<CommitId>,
    pub current: CommitId,
    pub kind: ChangeKind,
}

impl RefChange {
    pub fn branch(&self) -> Branch {
        Branch::new(self.reference.clone(), self.current.clone())
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResult {
    pub has_changes: bool,
    pub candidate_ref: Option<TrackedRef>,
    pub candidate_revision: Option<CommitId>,
    /// Every changed tracked ref, ordered by full ref name.
    pub changes: Vec<RefChange>,
}

impl PollResult {
    pub fn no_changes() -> Self {
        Self {
            has_changes: false,
            candidate_ref: None,
            candidate_revision: None,
            changes: Vec::new(),
        }
    }

    /// The chosen candidate as a [`Branch`], if any.
    pub fn candidate(&self) -> Option<Branch> {
        match (&self.candidate_ref, &self.candidate_revision) {
            (Some(reference), Some(revision)) => {
                Some(Branch::new(reference.clone(), revision.clone()))
            }
            _ => None,
        }
    }
}

/// Compare tracked refs against the build records.
///
/// Excluded refs never reach this function; callers pass the output of
/// [`select`].
pub fn detect_changes<C: RepositoryClient + ?Sized>(
    client: &C,
    store: &BuildStateStore,
    tracked: &BTreeMap<TrackedRef, Branch>,
) -> Result<Vec<RefChange>, ScmError> {
    let mut changes = Vec::new();

    for branch in tracked.values() {
        let Some(record) = store.get(&branch.reference) else {
            debug!(reference = %branch.reference, revision = %branch.revision, "never built");
            changes.push(RefChange {
                reference: branch.reference.clone(),
                previous: None,
                current: branch.revision.clone(),
                kind: ChangeKind::New,
            });
            continue;
        };

        if record.has_built(&branch.revision) {
            debug!(reference = %branch.reference, revision = %branch.revision, "unchanged");
            continue;
        }

        let kind = match client.is_ancestor(&record.built_revision, &branch.revision) {
            Ok(true) => ChangeKind::FastForward,
            Ok(false) => ChangeKind::Retargeted,
            // The old revision is gone from the workspace (pruned after a force push).
            Err(GitError::ObjectNotFound { .. }) => ChangeKind::Retargeted,
            Err(e) => return Err(ScmError::git("compare revisions", e)),
        };
        debug!(
            reference = %branch.reference,
            previous = %record.built_revision,
            current = %branch.revision,
            ?kind,
            "changed"
        );
        changes.push(RefChange {
            reference: branch.reference.clone(),
            previous: Some(record.built_revision.clone()),
            current: branch.revision.clone(),
            kind,
        });
    }

    Ok(changes)
}

/// Pick the change to build.
///
/// `changes` must be ordered by full ref name, as [`detect_changes`] returns
/// them.
pub fn choose_candidate<'a>(
    changes: &'a [RefChange],
    last_built: Option<&TrackedRef>,
    tie_break: TieBreak,
) -> Option<&'a RefChange> {
    if tie_break == TieBreak::LastBuilt {
        if let Some(last) = last_built {
            if let Some(change) = changes.iter().find(|c| &c.reference == last) {
                return Some(change);
            }
        }
    }
    changes.iter().min_by(|a, b| a.reference.cmp(&b.reference))
}

/// Fetch-and-compare change source for one project.
pub struct Poller<'a, C: ?Sized> {
    settings: &'a ProjectSettings,
    client: &'a C,
}

impl<'a, C: RepositoryClient + ?Sized> Poller<'a, C> {
    pub fn new(settings: &'a ProjectSettings, client: &'a C) -> Self {
        Self { settings, client }
    }

    fn fetch_tracked(&self, ctx: &OpContext) -> Result<BTreeMap<TrackedRef, Branch>, ScmError> {
        let settings = self.settings;
        self.client
            .fetch(&settings.remote, ctx)
            .map_err(|e| ScmError::git("fetch", e))?;
        let remote_refs = self
            .client
            .list_branches(&settings.remote)
            .map_err(|e| ScmError::git("list refs", e))?;
        debug!(count = remote_refs.len(), "fetched remote refs");

        Ok(select(&remote_refs, &settings.branches, &settings.exclude))
    }
}

impl<C: RepositoryClient + ?Sized> ChangeSource for Poller<'_, C> {
    fn poll(&self, ctx: &OpContext) -> Result<PollResult, ScmError> {
        let settings = self.settings;

        if !self.client.workspace_exists() {
            info!(
                workspace = %settings.paths.workspace_dir().display(),
                "workspace not created yet, no changes"
            );
            return Ok(PollResult::no_changes());
        }

        let _lock = WorkspaceLock::acquire(&settings.paths, ctx)?;
        ctx.check("poll")?;

        let tracked = self.fetch_tracked(ctx)?;
        let store = BuildStateStore::open(settings.paths.state_file(), settings.history_limit)?;
        let changes = detect_changes(self.client, &store, &tracked)?;

        let last_built = store.last_built().map(|r| &r.reference);
        let Some(chosen) = choose_candidate(&changes, last_built, settings.tie_break) else {
            info!(tracked = tracked.len(), "no changes");
            return Ok(PollResult::no_changes());
        };

        info!(
            candidate = %chosen.reference,
            revision = %chosen.current.short(12),
            changed = changes.len(),
            "changes found"
        );
        Ok(PollResult {
            has_changes: true,
            candidate_ref: Some(chosen.reference.clone()),
            candidate_revision: Some(chosen.current.clone()),
            changes,
        })
    }
}
