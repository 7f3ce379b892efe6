//! engine::build
//!
//! Build-time checkout and outcome recording.
//!
//! # Lifecycle
//!
//! ```text
//! prepare ──► (external build step) ──► finish
//!   │                                     │
//!   lock, init, fetch, checkout           record on success only
//! ```
//!
//! [`PreparedBuild`] owns the workspace lock from `prepare` until `finish`
//! consumes it, so a poll cannot fetch underneath a running build.
//!
//! # Invariants
//!
//! - The exact candidate revision is checked out, never the ref's tip at
//!   checkout time
//! - Only a successful outcome touches the build state store
//! - The workspace is created by the first build, before candidate
//!   resolution, so it exists even when that build fails

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::core::cancel::OpContext;
use crate::core::config::ProjectSettings;
use crate::core::ops::lock::WorkspaceLock;
use crate::core::select::select;
use crate::core::state::BuildStateStore;
use crate::core::types::{Branch, CommitId, TrackedRef};
use crate::git::{GitError, RepositoryClient};

use super::error::ScmError;
use super::poll::{choose_candidate, detect_changes};
use super::RevisionCheckout;

/// Result of the external build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failure,
}

/// Author of a commit newly included in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Culprit {
    pub name: String,
    pub email: String,
}

/// A workspace checked out at a candidate, ready for the build step.
#[derive(Debug)]
pub struct PreparedBuild {
    pub candidate: Branch,
    /// Authors of commits new to this build, deduplicated by email.
    pub culprits: Vec<Culprit>,
    /// Every remote ref as fetched for this build.
    pub fetched: Vec<Branch>,
    tracked: Vec<Branch>,
    _lock: WorkspaceLock,
}

impl PreparedBuild {
    /// Tracked refs observed when the build was prepared.
    pub fn tracked(&self) -> &[Branch] {
        &self.tracked
    }
}

/// Checkout and recording for one project's builds.
pub struct Builder<'a, C: ?Sized> {
    settings: &'a ProjectSettings,
    client: &'a C,
}

impl<'a, C: RepositoryClient + ?Sized> Builder<'a, C> {
    pub fn new(settings: &'a ProjectSettings, client: &'a C) -> Self {
        Self { settings, client }
    }

    /// Record a build outcome from a separate process.
    ///
    /// Takes the workspace lock and uses the refs as last fetched; nothing is
    /// fetched here.
    pub fn record(
        &self,
        candidate: &Branch,
        outcome: BuildOutcome,
        build_number: u64,
        ctx: &OpContext,
    ) -> Result<(), ScmError> {
        let _lock = WorkspaceLock::acquire(&self.settings.paths, ctx)?;
        if outcome == BuildOutcome::Failure {
            info!(reference = %candidate.reference, build_number, "build failed, state unchanged");
            return Ok(());
        }

        let remote_refs = self
            .client
            .list_branches(&self.settings.remote)
            .map_err(|e| ScmError::git("list refs", e))?;
        let tracked: Vec<Branch> =
            select(&remote_refs, &self.settings.branches, &self.settings.exclude)
                .into_values()
                .collect();
        self.record_success(candidate, &tracked, build_number)
    }

    fn record_success(
        &self,
        candidate: &Branch,
        tracked: &[Branch],
        build_number: u64,
    ) -> Result<(), ScmError> {
        let mut store = self.open_store()?;

        let mut contained = Vec::new();
        for branch in tracked {
            if branch.reference == candidate.reference || store.get(&branch.reference).is_some() {
                continue;
            }
            let inside = match self.client.is_ancestor(&branch.revision, &candidate.revision) {
                Ok(inside) => inside,
                Err(GitError::ObjectNotFound { .. }) => false,
                Err(e) => return Err(ScmError::git("compare revisions", e)),
            };
            if inside {
                contained.push(branch.clone());
            }
        }

        store.record_build(candidate, build_number, &contained)?;
        info!(
            reference = %candidate.reference,
            revision = %candidate.revision.short(12),
            build_number,
            seeded = contained.len(),
            "recorded successful build"
        );
        Ok(())
    }

    fn open_store(&self) -> Result<BuildStateStore, ScmError> {
        Ok(BuildStateStore::open(
            self.settings.paths.state_file(),
            self.settings.history_limit,
        )?)
    }

    fn ensure_workspace(&self) -> Result<(), ScmError> {
        if !self.client.workspace_exists() {
            info!(
                workspace = %self.settings.paths.workspace_dir().display(),
                "creating workspace"
            );
            self.client.init().map_err(|e| ScmError::git("init workspace", e))?;
        }
        self.client
            .set_remote(&self.settings.remote, &self.settings.url)
            .map_err(|e| ScmError::git("configure remote", e))
    }

    fn resolve_candidate(
        &self,
        store: &BuildStateStore,
        tracked: &BTreeMap<TrackedRef, Branch>,
    ) -> Result<Branch, ScmError> {
        let changes = detect_changes(self.client, store, tracked)?;
        let last_built = store.last_built().map(|r| &r.reference);
        if let Some(change) = choose_candidate(&changes, last_built, self.settings.tie_break) {
            return Ok(change.branch());
        }
        if let Some(branch) = last_built.and_then(|r| tracked.get(r)) {
            debug!(reference = %branch.reference, "no changes, rebuilding last built ref");
            return Ok(branch.clone());
        }
        tracked.values().next().cloned().ok_or(ScmError::NoCandidate)
    }

    /// Authors of the commits `candidate` adds over what was built before.
    pub fn culprits(
        &self,
        store: &BuildStateStore,
        candidate: &Branch,
    ) -> Result<Vec<Culprit>, ScmError> {
        let base = self.culprit_base(store, candidate)?;
        let mut commits = self
            .client
            .commits_between(base.as_ref(), &candidate.revision)
            .map_err(|e| ScmError::git("list new commits", e))?;
        if base.is_none() {
            commits.truncate(1);
        }

        let mut seen = HashSet::new();
        Ok(commits
            .into_iter()
            .filter(|c| seen.insert(c.author_email.clone()))
            .map(|c| Culprit {
                name: c.author_name,
                email: c.author_email,
            })
            .collect())
    }

    fn culprit_base(
        &self,
        store: &BuildStateStore,
        candidate: &Branch,
    ) -> Result<Option<CommitId>, ScmError> {
        if let Some(record) = store.get(&candidate.reference) {
            // Any revision still present works as a base, ancestor or not.
            return match self.client.is_ancestor(&record.built_revision, &candidate.revision) {
                Ok(_) => Ok(Some(record.built_revision.clone())),
                Err(GitError::ObjectNotFound { .. }) => Ok(None),
                Err(e) => Err(ScmError::git("compare revisions", e)),
            };
        }

        let Some(last) = store.last_built() else {
            return Ok(None);
        };
        match self.client.is_ancestor(&last.built_revision, &candidate.revision) {
            Ok(true) => Ok(Some(last.built_revision.clone())),
            Ok(false) | Err(GitError::ObjectNotFound { .. }) => Ok(None),
            Err(e) => Err(ScmError::git("compare revisions", e)),
        }
    }
}

impl<C: RepositoryClient + ?Sized> RevisionCheckout for Builder<'_, C> {
    fn prepare(&self, candidate: Option<&Branch>, ctx: &OpContext) -> Result<PreparedBuild, ScmError> {
        let settings = self.settings;
        let lock = WorkspaceLock::acquire(&settings.paths, ctx)?;
        self.ensure_workspace()?;

        self.client
            .fetch(&settings.remote, ctx)
            .map_err(|e| ScmError::git("fetch", e))?;
        let fetched = self
            .client
            .list_branches(&settings.remote)
            .map_err(|e| ScmError::git("list refs", e))?;
        let tracked = select(&fetched, &settings.branches, &settings.exclude);

        let store = self.open_store()?;
        let candidate = match candidate {
            Some(candidate) => candidate.clone(),
            None => self.resolve_candidate(&store, &tracked)?,
        };
        ctx.check("checkout")?;

        if settings.clean_before_build {
            self.client.clean().map_err(|e| ScmError::git("clean workspace", e))?;
        }
        self.client
            .checkout(&candidate.revision)
            .map_err(|e| ScmError::git("checkout", e))?;
        info!(
            reference = %candidate.reference,
            revision = %candidate.revision.short(12),
            "checked out candidate"
        );

        let culprits = self.culprits(&store, &candidate)?;
        for branch in &fetched {
            info!(branch = %branch.reference, revision = %branch.revision, "fetched");
        }

        Ok(PreparedBuild {
            candidate,
            culprits,
            fetched,
            tracked: tracked.into_values().collect(),
            _lock: lock,
        })
    }

    fn finish(
        &self,
        build: PreparedBuild,
        outcome: BuildOutcome,
        build_number: u64,
    ) -> Result<(), ScmError> {
        match outcome {
            BuildOutcome::Success => {
                self.record_success(&build.candidate, &build.tracked, build_number)
            }
            BuildOutcome::Failure => {
                info!(
                    reference = %build.candidate.reference,
                    build_number,
                    "build failed, state unchanged"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::BranchSpec;
    use crate::core::types::Identity;
    use crate::engine::{ChangeSource, ErrorKind, Poller};
    use crate::git::{FakeClient, FakeOperation, FakeRemote};
    use tempfile::TempDir;

    fn alice() -> Identity {
        Identity::new("Alice", "alice@example.com").unwrap()
    }

    fn bob() -> Identity {
        Identity::new("Bob", "bob@example.com").unwrap()
    }

    fn settings(dir: &TempDir, include: &str) -> ProjectSettings {
        let mut settings = ProjectSettings::new("fake://remote", dir.path());
        settings.branches = BranchSpec::parse(include, "origin").unwrap();
        settings
    }

    fn ctx() -> OpContext {
        OpContext::unbounded()
    }

    fn build_once(settings: &ProjectSettings, client: &FakeClient, number: u64) -> PreparedBuild {
        let builder = Builder::new(settings, client);
        let prepared = builder.prepare(None, &ctx()).unwrap();
        let candidate = prepared.candidate.clone();
        builder.finish(prepared, BuildOutcome::Success, number).unwrap();
        builder.prepare(Some(&candidate), &ctx()).unwrap()
    }

    mod prepare {
        use super::*;

        #[test]
        fn first_build_creates_workspace() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let tip = remote.commit("master", &alice(), "initial");
            let settings = settings(&dir, "");
            let client = remote.client();

            let prepared = Builder::new(&settings, &client).prepare(None, &ctx()).unwrap();
            assert!(client.workspace_exists());
            assert_eq!(prepared.candidate.revision, tip);
            assert_eq!(client.head().unwrap(), Some(tip));
            assert_eq!(remote.operations()[0], FakeOperation::Init);
        }

        #[test]
        fn exact_candidate_revision_is_checked_out() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();

            // The branch moves between poll and build.
            remote.commit("master", &alice(), "b");
            let candidate = Branch::new(TrackedRef::branch("master").unwrap(), a.clone());
            let prepared = Builder::new(&settings, &client)
                .prepare(Some(&candidate), &ctx())
                .unwrap();
            assert_eq!(prepared.candidate.revision, a);
            assert_eq!(client.head().unwrap(), Some(a));
        }

        #[test]
        fn no_tracked_refs_is_no_candidate() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "release/*");
            let client = remote.client();

            let err = Builder::new(&settings, &client).prepare(None, &ctx()).unwrap_err();
            assert!(matches!(err, ScmError::NoCandidate));
            assert!(client.workspace_exists());
        }

        #[test]
        fn clean_runs_before_checkout_when_configured() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let tip = remote.commit("master", &alice(), "a");
            let mut settings = settings(&dir, "");
            settings.clean_before_build = true;
            let client = remote.client();

            Builder::new(&settings, &client).prepare(None, &ctx()).unwrap();
            let ops = remote.operations();
            let clean = ops.iter().position(|op| op == &FakeOperation::Clean).unwrap();
            let checkout = ops
                .iter()
                .position(|op| op == &FakeOperation::Checkout(tip.clone()))
                .unwrap();
            assert!(clean < checkout);
        }

        #[test]
        fn unchanged_project_rebuilds_last_built_ref() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("alpha", &alice(), "a");
            let beta = remote.commit("beta", &alice(), "b");
            let settings = settings(&dir, "");
            let client = remote.client();
            let builder = Builder::new(&settings, &client);

            let candidate = Branch::new(TrackedRef::branch("beta").unwrap(), beta.clone());
            let prepared = builder.prepare(Some(&candidate), &ctx()).unwrap();
            builder.finish(prepared, BuildOutcome::Success, 1).unwrap();
            let prepared = builder.prepare(None, &ctx()).unwrap();
            let alpha = prepared.candidate.clone();
            builder.finish(prepared, BuildOutcome::Success, 2).unwrap();
            assert_eq!(alpha.reference.name(), "alpha");

            let prepared = builder.prepare(None, &ctx()).unwrap();
            assert_eq!(prepared.candidate.reference.name(), "alpha");
        }
    }

    mod recording {
        use super::*;

        #[test]
        fn failed_build_leaves_change_outstanding() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();
            let builder = Builder::new(&settings, &client);

            let prepared = builder.prepare(None, &ctx()).unwrap();
            builder.finish(prepared, BuildOutcome::Failure, 1).unwrap();

            let result = Poller::new(&settings, &client).poll(&ctx()).unwrap();
            assert!(result.has_changes);
        }

        #[test]
        fn successful_build_quiets_next_poll() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();

            drop(build_once(&settings, &client, 1));
            let result = Poller::new(&settings, &client).poll(&ctx()).unwrap();
            assert!(!result.has_changes);
        }

        #[test]
        fn contained_sibling_is_seeded_and_stays_quiet() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            remote.set_ref(TrackedRef::branch("fork").unwrap(), &a);
            remote.commit("master", &alice(), "b");
            let settings = settings(&dir, "");
            let client = remote.client();
            let builder = Builder::new(&settings, &client);

            let master = Branch::new(
                TrackedRef::branch("master").unwrap(),
                remote.branch_tip("master").unwrap(),
            );
            let prepared = builder.prepare(Some(&master), &ctx()).unwrap();
            builder.finish(prepared, BuildOutcome::Success, 1).unwrap();
            assert!(!Poller::new(&settings, &client).poll(&ctx()).unwrap().has_changes);

            let fork_tip = remote.commit("fork", &bob(), "fork work");
            let result = Poller::new(&settings, &client).poll(&ctx()).unwrap();
            assert!(result.has_changes);
            assert_eq!(result.candidate_ref.unwrap().name(), "fork");
            assert_eq!(result.candidate_revision, Some(fork_tip));
        }

        #[test]
        fn record_without_prepare_uses_last_fetch() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();
            let builder = Builder::new(&settings, &client);
            drop(builder.prepare(None, &ctx()).unwrap());

            let fetches = remote
                .operations()
                .iter()
                .filter(|op| **op == FakeOperation::Fetch)
                .count();
            let candidate = Branch::new(TrackedRef::branch("master").unwrap(), a);
            builder
                .record(&candidate, BuildOutcome::Success, 7, &ctx())
                .unwrap();

            let after = remote
                .operations()
                .iter()
                .filter(|op| **op == FakeOperation::Fetch)
                .count();
            assert_eq!(fetches, after);
            let store = BuildStateStore::open(settings.paths.state_file(), 20).unwrap();
            assert_eq!(store.last_built().unwrap().build_number, 7);
        }
    }

    mod culprits {
        use super::*;

        #[test]
        fn new_author_since_last_build() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();
            drop(build_once(&settings, &client, 1));

            remote.commit("master", &bob(), "b");
            let builder = Builder::new(&settings, &client);
            let prepared = builder.prepare(None, &ctx()).unwrap();
            assert_eq!(
                prepared.culprits,
                vec![Culprit {
                    name: "Bob".into(),
                    email: "bob@example.com".into()
                }]
            );
        }

        #[test]
        fn deduplicated_by_email_in_order() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();
            drop(build_once(&settings, &client, 1));

            remote.commit("master", &alice(), "b");
            remote.commit("master", &bob(), "c");
            remote.commit("master", &alice(), "d");
            let prepared = Builder::new(&settings, &client).prepare(None, &ctx()).unwrap();
            let emails: Vec<&str> = prepared.culprits.iter().map(|c| c.email.as_str()).collect();
            assert_eq!(emails, vec!["alice@example.com", "bob@example.com"]);
        }

        #[test]
        fn first_build_blames_tip_author_only() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            remote.commit("master", &bob(), "b");
            let settings = settings(&dir, "master");
            let client = remote.client();

            let prepared = Builder::new(&settings, &client).prepare(None, &ctx()).unwrap();
            assert_eq!(prepared.culprits.len(), 1);
            assert_eq!(prepared.culprits[0].email, "bob@example.com");
        }

        #[test]
        fn rebuild_of_same_revision_has_no_culprits() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, "master");
            let client = remote.client();

            let prepared = build_once(&settings, &client, 1);
            assert!(prepared.culprits.is_empty());
        }
    }

    #[test]
    fn missing_object_surfaces_as_git_error() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        remote.commit("master", &alice(), "a");
        let settings = settings(&dir, "master");
        let client = remote.client();

        let bogus = Branch::new(
            TrackedRef::branch("master").unwrap(),
            CommitId::new("f".repeat(40)).unwrap(),
        );
        let err = Builder::new(&settings, &client)
            .prepare(Some(&bogus), &ctx())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
