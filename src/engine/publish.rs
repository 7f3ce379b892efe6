//! engine::publish
//!
//! Publishing a build's commits to the shared integration ref.
//!
//! # Protocol
//!
//! Each attempt works from a fresh fetch:
//!
//! 1. Resolve the integration ref's remote tip
//! 2. Absent: push the local commit, creating the ref
//! 3. Local already contained: nothing to do
//! 4. Remote tip is an ancestor of local: fast-forward push
//! 5. Otherwise: merge `[remote tip, local]` and push the merge
//!
//! A push rejected as non-fast-forward means another publisher won the race;
//! the loop starts over from the fetch. Nothing is ever force-pushed, so the
//! concurrent commit always survives. The loop is bounded by
//! `publish.max_attempts`; running out is a conflict error.
//!
//! Transport failures are not retried.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::cancel::OpContext;
use crate::core::config::{ProjectSettings, PublishSettings};
use crate::core::ops::lock::WorkspaceLock;
use crate::core::state::BuildStateStore;
use crate::core::types::{Branch, CommitId};
use crate::git::{GitError, RepositoryClient};

use super::error::ScmError;
use super::PostBuildAction;

/// How a publish ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The integration ref already contained the local commit.
    UpToDate { revision: CommitId },
    /// The integration ref did not exist and now points at the local commit.
    Created { revision: CommitId, attempts: u32 },
    /// The integration ref moved forward to the local commit.
    FastForward { revision: CommitId, attempts: u32 },
    /// A merge of the remote tip and the local commit was pushed.
    Merged { revision: CommitId, attempts: u32 },
}

impl PublishOutcome {
    /// The integration ref's revision after publishing.
    pub fn revision(&self) -> &CommitId {
        match self {
            PublishOutcome::UpToDate { revision }
            | PublishOutcome::Created { revision, .. }
            | PublishOutcome::FastForward { revision, .. }
            | PublishOutcome::Merged { revision, .. } => revision,
        }
    }
}

enum Step {
    Create,
    FastForward,
    Merge,
}

/// Publisher for one project.
pub struct Publisher<'a, C: ?Sized> {
    settings: &'a ProjectSettings,
    publish: &'a PublishSettings,
    client: &'a C,
}

impl<'a, C: RepositoryClient + ?Sized> Publisher<'a, C> {
    /// A publisher for `settings`.
    ///
    /// # Errors
    ///
    /// [`ScmError::Configuration`] if publishing is not enabled.
    pub fn new(settings: &'a ProjectSettings, client: &'a C) -> Result<Self, ScmError> {
        let publish = settings.publish.as_ref().ok_or_else(|| {
            ScmError::Configuration("publishing is not enabled for this project".to_string())
        })?;
        Ok(Self {
            settings,
            publish,
            client,
        })
    }

    fn remote_tip(&self) -> Result<Option<CommitId>, ScmError> {
        let target = &self.publish.merge_target;
        Ok(self
            .client
            .list_branches(&self.settings.remote)
            .map_err(|e| ScmError::git("list refs", e))?
            .into_iter()
            .find(|b| &b.reference == target)
            .map(|b| b.revision))
    }

    fn record(&self, revision: &CommitId, build_number: u64) -> Result<(), ScmError> {
        let mut store =
            BuildStateStore::open(self.settings.paths.state_file(), self.settings.history_limit)?;
        store.record_published(
            &Branch::new(self.publish.merge_target.clone(), revision.clone()),
            build_number,
        )?;
        Ok(())
    }

    fn conflict(&self, attempts: u32, message: String) -> ScmError {
        ScmError::Conflict {
            target: self.publish.merge_target.to_string(),
            attempts,
            message,
        }
    }
}

impl<C: RepositoryClient + ?Sized> PostBuildAction for Publisher<'_, C> {
    fn perform(
        &self,
        built: &Branch,
        build_number: u64,
        ctx: &OpContext,
    ) -> Result<PublishOutcome, ScmError> {
        let settings = self.settings;
        let target = &self.publish.merge_target;
        let _lock = WorkspaceLock::acquire(&settings.paths, ctx)?;

        let local = self
            .client
            .head()
            .map_err(|e| ScmError::git("read workspace head", e))?
            .ok_or_else(|| ScmError::WorkspaceState {
                operation: "publish",
                message: "workspace has no commit checked out".to_string(),
            })?;
        let message = format!("Merge build {build_number} of {} into {target}", built.reference);

        let max_attempts = self.publish.max_attempts;
        for attempt in 1..=max_attempts {
            ctx.check("publish")?;
            self.client
                .fetch(&settings.remote, ctx)
                .map_err(|e| ScmError::git("fetch", e))?;

            let (revision, step) = match self.remote_tip()? {
                None => (local.clone(), Step::Create),
                Some(tip) => {
                    if self.is_ancestor(&local, &tip)? {
                        info!(integration = %target, revision = %tip.short(12), "already published");
                        if tip == local {
                            self.record(&tip, build_number)?;
                        }
                        return Ok(PublishOutcome::UpToDate { revision: tip });
                    }
                    if self.is_ancestor(&tip, &local)? {
                        (local.clone(), Step::FastForward)
                    } else {
                        let merged = self
                            .client
                            .merge(&tip, &local, &message, &settings.signatures)
                            .map_err(|e| match e {
                                GitError::MergeConflict { .. } => {
                                    self.conflict(attempt, e.to_string())
                                }
                                other => ScmError::git("merge", other),
                            })?;
                        debug!(remote = %tip.short(12), local = %local.short(12), merge = %merged.short(12), "merged");
                        (merged, Step::Merge)
                    }
                }
            };

            info!(attempt, integration = %target, revision = %revision.short(12), "pushing");
            match self.client.push(&settings.remote, &revision, target, ctx) {
                Ok(()) => {
                    if matches!(step, Step::Merge) {
                        self.client
                            .checkout(&revision)
                            .map_err(|e| ScmError::git("checkout", e))?;
                    }
                    self.record(&revision, build_number)?;
                    info!(integration = %target, revision = %revision.short(12), attempt, "published");
                    return Ok(match step {
                        Step::Create => PublishOutcome::Created {
                            revision,
                            attempts: attempt,
                        },
                        Step::FastForward => PublishOutcome::FastForward {
                            revision,
                            attempts: attempt,
                        },
                        Step::Merge => PublishOutcome::Merged {
                            revision,
                            attempts: attempt,
                        },
                    });
                }
                Err(GitError::NonFastForward { message, .. }) => {
                    warn!(attempt, max_attempts, integration = %target, %message, "push rejected, retrying");
                }
                Err(e) => return Err(ScmError::git("push", e)),
            }
        }

        Err(self.conflict(
            max_attempts,
            "the integration ref kept moving; giving up".to_string(),
        ))
    }
}

impl<C: RepositoryClient + ?Sized> Publisher<'_, C> {
    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, ScmError> {
        self.client
            .is_ancestor(ancestor, descendant)
            .map_err(|e| ScmError::git("compare revisions", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PublishSettings;
    use crate::core::types::{Identity, TrackedRef};
    use crate::engine::{ErrorKind, RevisionCheckout, Builder, BuildOutcome, ChangeSource, Poller};
    use crate::git::{FailOn, FakeClient, FakeOperation, FakeRemote};
    use tempfile::TempDir;

    fn alice() -> Identity {
        Identity::new("Alice", "alice@example.com").unwrap()
    }

    fn ci() -> Identity {
        Identity::new("CI", "ci@example.com").unwrap()
    }

    fn settings(dir: &TempDir, max_attempts: u32) -> ProjectSettings {
        let mut settings = ProjectSettings::new("fake://remote", dir.path());
        settings.publish = Some(PublishSettings {
            merge_target: TrackedRef::branch("integrate").unwrap(),
            max_attempts,
        });
        settings.signatures = crate::core::types::Signatures::single(ci());
        settings
    }

    fn ctx() -> OpContext {
        OpContext::unbounded()
    }

    /// Check out master and add one build commit on top.
    fn built_workspace(settings: &ProjectSettings, remote: &FakeRemote) -> (FakeClient, Branch) {
        let client = remote.client();
        let prepared = Builder::new(settings, &client).prepare(None, &ctx()).unwrap();
        let built = prepared.candidate.clone();
        client.add(&["artifact.txt"]).unwrap();
        client.commit("build output", &settings.signatures).unwrap();
        Builder::new(settings, &client)
            .finish(prepared, BuildOutcome::Success, 1)
            .unwrap();
        (client, built)
    }

    fn integrate() -> TrackedRef {
        TrackedRef::branch("integrate").unwrap()
    }

    #[test]
    fn disabled_publishing_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let client = remote.client();
        let settings = ProjectSettings::new("fake://remote", dir.path());
        let err = Publisher::new(&settings, &client).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    mod outcomes {
        use super::*;

        #[test]
        fn absent_target_is_created() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, 3);
            let (client, built) = built_workspace(&settings, &remote);
            let head = client.head().unwrap().unwrap();

            let outcome = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            assert_eq!(
                outcome,
                PublishOutcome::Created {
                    revision: head.clone(),
                    attempts: 1
                }
            );
            assert_eq!(remote.tip(&integrate()), Some(head));
        }

        #[test]
        fn descendant_is_fast_forwarded() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            remote.set_ref(integrate(), &a);
            let mut settings = settings(&dir, 3);
            settings.branches = crate::core::spec::BranchSpec::parse("master", "origin").unwrap();
            let (client, built) = built_workspace(&settings, &remote);

            let outcome = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            assert!(matches!(outcome, PublishOutcome::FastForward { attempts: 1, .. }));
            assert_eq!(remote.tip(&integrate()), client.head().unwrap());
        }

        #[test]
        fn diverged_target_is_merged_keeping_both_sides() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            remote.set_ref(integrate(), &a);
            let other = remote.commit("integrate", &alice(), "other build");
            let mut settings = settings(&dir, 3);
            settings.branches = crate::core::spec::BranchSpec::parse("master", "origin").unwrap();
            let (client, built) = built_workspace(&settings, &remote);
            let local = client.head().unwrap().unwrap();

            let outcome = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            let PublishOutcome::Merged { revision, attempts } = outcome else {
                panic!("expected a merge, got {outcome:?}");
            };
            assert_eq!(attempts, 1);
            assert_eq!(remote.tip(&integrate()), Some(revision.clone()));
            assert_eq!(remote.parents(&revision), vec![other.clone(), local.clone()]);
            assert_eq!(remote.author(&revision), Some(ci()));
            assert_eq!(client.head().unwrap(), Some(revision));
        }

        #[test]
        fn contained_local_is_up_to_date() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, 3);
            let client = remote.client();
            let prepared = Builder::new(&settings, &client).prepare(None, &ctx()).unwrap();
            let built = prepared.candidate.clone();
            drop(prepared);
            remote.set_ref(integrate(), &built.revision);
            remote.commit("integrate", &alice(), "later");
            remote.clear_operations();

            let outcome = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            assert!(matches!(outcome, PublishOutcome::UpToDate { .. }));
            assert_eq!(remote.push_count(), 0);

            // The newer tip was never built here, so nothing is recorded for
            // it and an all-refs project still sees it as new.
            let later = remote.tip(&integrate()).unwrap();
            let result = Poller::new(&settings, &client).poll(&ctx()).unwrap();
            let change = result
                .changes
                .iter()
                .find(|c| c.reference == integrate())
                .expect("integration ref should be reported");
            assert_eq!(change.kind, crate::engine::ChangeKind::New);
            assert_eq!(change.current, later);
        }

        #[test]
        fn published_target_is_not_a_change() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, 3);
            let (client, built) = built_workspace(&settings, &remote);

            Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            let result = Poller::new(&settings, &client).poll(&ctx()).unwrap();
            assert!(!result.has_changes, "unexpected changes: {:?}", result.changes);
        }
    }

    mod retries {
        use super::*;

        #[test]
        fn concurrent_publisher_is_merged_after_retry() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            remote.set_ref(integrate(), &a);
            let mut settings = settings(&dir, 5);
            settings.branches = crate::core::spec::BranchSpec::parse("master", "origin").unwrap();
            let (client, built) = built_workspace(&settings, &remote);
            let local = client.head().unwrap().unwrap();
            remote.race_next_pushes(2, &alice());

            let outcome = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap();
            let PublishOutcome::Merged { revision, attempts } = outcome else {
                panic!("expected a merge, got {outcome:?}");
            };
            assert_eq!(attempts, 3);
            assert!(remote.is_ancestor(&local, &revision));
            assert_eq!(remote.push_count(), 3);

            // Both racing commits survive.
            let racing: Vec<CommitId> = remote.parents(&revision);
            assert!(racing.contains(&local));
            let concurrent = racing.iter().find(|p| **p != local).unwrap();
            assert_eq!(remote.author(concurrent), Some(alice()));
        }

        #[test]
        fn exhausted_attempts_are_a_conflict() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, 2);
            let (client, built) = built_workspace(&settings, &remote);
            remote.race_next_pushes(10, &alice());

            let err = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert_eq!(remote.push_count(), 2);
            assert!(err.to_string().contains("after 2 attempt(s)"));
        }

        #[test]
        fn merge_conflict_is_immediate() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            remote.set_ref(integrate(), &a);
            remote.commit("integrate", &alice(), "other");
            let mut settings = settings(&dir, 5);
            settings.branches = crate::core::spec::BranchSpec::parse("master", "origin").unwrap();
            let (client, built) = built_workspace(&settings, &remote);
            client.set_conflict_on_merge(true);

            let err = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert_eq!(remote.push_count(), 0);
        }

        #[test]
        fn transport_failure_is_not_retried() {
            let dir = TempDir::new().unwrap();
            let remote = FakeRemote::new();
            remote.commit("master", &alice(), "a");
            let settings = settings(&dir, 5);
            let (client, built) = built_workspace(&settings, &remote);
            remote.fail_on(FailOn::Push("permission denied".into()));

            let err = Publisher::new(&settings, &client)
                .unwrap()
                .perform(&built, 1, &ctx())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transport);
            let fetches = remote
                .operations()
                .iter()
                .filter(|op| **op == FakeOperation::Fetch)
                .count();
            // One fetch for the build, one for the single publish attempt.
            assert_eq!(fetches, 2);
        }
    }
}
