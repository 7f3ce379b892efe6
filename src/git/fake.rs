//! git::fake
//!
//! In-memory repository client for deterministic engine tests.
//!
//! # Design
//!
//! [`FakeRemote`] plays the shared remote: a commit graph plus a table of
//! branch and tag refs. [`FakeClient`] plays one workspace bound to that
//! remote. Commit objects live in one store shared by the remote and all of
//! its clients; only refs are per repository, which is all the engine
//! observes.
//!
//! Failure scenarios are configured on the remote:
//!
//! - [`FailOn`] makes fetches or pushes fail with a transport error
//! - [`FakeRemote::race_next_pushes`] lets a simulated concurrent publisher
//!   land a commit on the target just before each of the next pushes, so
//!   those pushes are rejected as non-fast-forward
//!
//! # Example
//!
//! ```
//! use gitscm::core::cancel::OpContext;
//! use gitscm::core::types::Identity;
//! use gitscm::git::{FakeRemote, RepositoryClient};
//!
//! let remote = FakeRemote::new();
//! let alice = Identity::new("Alice", "alice@example.com").unwrap();
//! let tip = remote.commit("master", &alice, "initial");
//!
//! let client = remote.client();
//! client.init().unwrap();
//! client.set_remote("origin", "fake://remote").unwrap();
//! client.fetch("origin", &OpContext::unbounded()).unwrap();
//!
//! let branches = client.list_branches("origin").unwrap();
//! assert_eq!(branches[0].revision, tip);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::core::cancel::OpContext;
use crate::core::types::{Branch, CommitId, Identity, Signatures, TrackedRef};
use crate::git::client::{CommandOutput, CommitInfo, GitError, RepositoryClient};

/// Configuration for which remote operation should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    /// Fetches fail with a transport error carrying this message.
    Fetch(String),
    /// Pushes fail with a transport error carrying this message.
    Push(String),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOperation {
    Init,
    Fetch,
    Checkout(CommitId),
    Clean,
    Commit(CommitId),
    Merge(CommitId),
    Push { target: TrackedRef, revision: CommitId },
}

#[derive(Debug, Clone)]
struct FakeCommit {
    parents: Vec<CommitId>,
    author: Identity,
    message: String,
    time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RemoteInner {
    commits: HashMap<CommitId, FakeCommit>,
    refs: BTreeMap<TrackedRef, CommitId>,
    next_seq: u64,
    fail_on: Option<FailOn>,
    racing_pushes: usize,
    racing_author: Option<Identity>,
    operations: Vec<FakeOperation>,
}

impl RemoteInner {
    fn create_commit(&mut self, parents: Vec<CommitId>, author: Identity, message: &str) -> CommitId {
        self.next_seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.next_seq.to_be_bytes());
        for parent in &parents {
            hasher.update(parent.as_str().as_bytes());
        }
        hasher.update(author.to_string().as_bytes());
        hasher.update(message.as_bytes());
        let hex_id = hex::encode(hasher.finalize());

        // Sha256 hex is always 64 lowercase hex characters.
        let id = CommitId::new(hex_id).unwrap_or_else(|_| unreachable!());
        self.commits.insert(
            id.clone(),
            FakeCommit {
                parents,
                author,
                message: message.to_string(),
                time: Utc::now(),
            },
        );
        id
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        self.reachable(std::iter::once(descendant.clone()))
            .contains(ancestor)
    }

    /// Every commit reachable from `tips`, tips included.
    fn reachable(&self, tips: impl IntoIterator<Item = CommitId>) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<CommitId> = tips.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn require(&self, id: &CommitId) -> Result<&FakeCommit, GitError> {
        self.commits.get(id).ok_or_else(|| GitError::ObjectNotFound {
            oid: id.to_string(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A shared in-memory remote repository.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh workspace client bound to this remote.
    pub fn client(&self) -> FakeClient {
        FakeClient {
            remote: self.clone(),
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    /// Commit on top of `branch` (creating it if needed) and move it.
    pub fn commit(&self, branch: &str, author: &Identity, message: &str) -> CommitId {
        let reference = self.branch_ref(branch);
        let mut inner = lock(&self.inner);
        let parents: Vec<CommitId> = inner.refs.get(&reference).cloned().into_iter().collect();
        let id = inner.create_commit(parents, author.clone(), message);
        inner.refs.insert(reference, id.clone());
        id
    }

    /// Create a commit with explicit parents without moving any ref.
    pub fn commit_with_parents(
        &self,
        parents: &[CommitId],
        author: &Identity,
        message: &str,
    ) -> CommitId {
        lock(&self.inner).create_commit(parents.to_vec(), author.clone(), message)
    }

    /// Point a ref at a commit, creating or retargeting it.
    pub fn set_ref(&self, reference: TrackedRef, revision: &CommitId) {
        lock(&self.inner).refs.insert(reference, revision.clone());
    }

    pub fn delete_ref(&self, reference: &TrackedRef) {
        lock(&self.inner).refs.remove(reference);
    }

    /// Current tip of a ref.
    pub fn tip(&self, reference: &TrackedRef) -> Option<CommitId> {
        lock(&self.inner).refs.get(reference).cloned()
    }

    /// Current tip of a branch.
    pub fn branch_tip(&self, branch: &str) -> Option<CommitId> {
        self.tip(&self.branch_ref(branch))
    }

    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        lock(&self.inner).is_ancestor(ancestor, descendant)
    }

    /// Parents of a commit, empty for roots and unknown ids.
    pub fn parents(&self, id: &CommitId) -> Vec<CommitId> {
        lock(&self.inner)
            .commits
            .get(id)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    /// Author of a commit.
    pub fn author(&self, id: &CommitId) -> Option<Identity> {
        lock(&self.inner).commits.get(id).map(|c| c.author.clone())
    }

    /// Make fetches or pushes fail until cleared.
    pub fn fail_on(&self, fail_on: FailOn) {
        lock(&self.inner).fail_on = Some(fail_on);
    }

    pub fn clear_fail_on(&self) {
        lock(&self.inner).fail_on = None;
    }

    /// Let a concurrent publisher win the race against the next `count` pushes.
    ///
    /// Before each of those pushes lands, a commit by `author` is added on
    /// top of the target's current tip.
    pub fn race_next_pushes(&self, count: usize, author: &Identity) {
        let mut inner = lock(&self.inner);
        inner.racing_pushes = count;
        inner.racing_author = Some(author.clone());
    }

    /// Operations performed by clients of this remote, in order.
    pub fn operations(&self) -> Vec<FakeOperation> {
        lock(&self.inner).operations.clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.inner).operations.clear();
    }

    /// Number of pushes attempted against this remote.
    pub fn push_count(&self) -> usize {
        lock(&self.inner)
            .operations
            .iter()
            .filter(|op| matches!(op, FakeOperation::Push { .. }))
            .count()
    }

    fn branch_ref(&self, branch: &str) -> TrackedRef {
        TrackedRef::branch(branch).unwrap_or_else(|e| panic!("invalid fake branch name: {e}"))
    }

    fn record(&self, op: FakeOperation) {
        lock(&self.inner).operations.push(op);
    }
}

#[derive(Debug, Default)]
struct WorkspaceState {
    exists: bool,
    remotes: BTreeMap<String, String>,
    /// Remote refs as of the last fetch.
    fetched: BTreeMap<TrackedRef, CommitId>,
    head: Option<CommitId>,
    staged: Vec<String>,
    local_branches: BTreeMap<String, CommitId>,
    local_tags: BTreeMap<String, CommitId>,
    conflict_on_merge: bool,
}

/// One workspace backed by a [`FakeRemote`].
#[derive(Debug)]
pub struct FakeClient {
    remote: FakeRemote,
    state: Mutex<WorkspaceState>,
}

impl FakeClient {
    /// The remote this client talks to.
    pub fn remote(&self) -> &FakeRemote {
        &self.remote
    }

    /// Make every subsequent merge report conflicts.
    pub fn set_conflict_on_merge(&self, conflict: bool) {
        lock(&self.state).conflict_on_merge = conflict;
    }

    /// Files staged since the last commit.
    pub fn staged(&self) -> Vec<String> {
        lock(&self.state).staged.clone()
    }

    pub fn local_branch(&self, name: &str) -> Option<CommitId> {
        lock(&self.state).local_branches.get(name).cloned()
    }

    pub fn local_tag(&self, name: &str) -> Option<CommitId> {
        lock(&self.state).local_tags.get(name).cloned()
    }

    fn existing(&self) -> Result<MutexGuard<'_, WorkspaceState>, GitError> {
        let state = lock(&self.state);
        if !state.exists {
            return Err(GitError::WorkspaceMissing {
                path: "<fake workspace>".into(),
            });
        }
        Ok(state)
    }

    fn require_remote(state: &WorkspaceState, remote: &str, operation: &str) -> Result<(), GitError> {
        if state.remotes.contains_key(remote) {
            Ok(())
        } else {
            Err(GitError::Transport {
                operation: operation.to_string(),
                message: format!("remote '{remote}' is not configured"),
            })
        }
    }
}

impl RepositoryClient for FakeClient {
    fn workspace_exists(&self) -> bool {
        lock(&self.state).exists
    }

    fn init(&self) -> Result<(), GitError> {
        lock(&self.state).exists = true;
        self.remote.record(FakeOperation::Init);
        Ok(())
    }

    fn init_bare(&self) -> Result<(), GitError> {
        self.init()
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.existing()?
            .remotes
            .insert(name.to_string(), url.to_string());
        Ok(())
    }

    fn fetch(&self, remote: &str, ctx: &OpContext) -> Result<(), GitError> {
        ctx.check("fetch")?;
        let mut state = self.existing()?;
        Self::require_remote(&state, remote, "fetch")?;

        let refs = {
            let inner = lock(&self.remote.inner);
            if let Some(FailOn::Fetch(message)) = &inner.fail_on {
                return Err(GitError::Transport {
                    operation: "fetch".to_string(),
                    message: message.clone(),
                });
            }
            inner.refs.clone()
        };
        self.remote.record(FakeOperation::Fetch);

        ctx.check("fetch")?;
        state.fetched = refs;
        Ok(())
    }

    fn list_branches(&self, _remote: &str) -> Result<Vec<Branch>, GitError> {
        let state = self.existing()?;
        Ok(state
            .fetched
            .iter()
            .map(|(reference, revision)| Branch::new(reference.clone(), revision.clone()))
            .collect())
    }

    fn checkout(&self, revision: &CommitId) -> Result<(), GitError> {
        let mut state = self.existing()?;
        lock(&self.remote.inner).require(revision)?;
        state.head = Some(revision.clone());
        state.staged.clear();
        self.remote.record(FakeOperation::Checkout(revision.clone()));
        Ok(())
    }

    fn clean(&self) -> Result<(), GitError> {
        self.existing()?.staged.clear();
        self.remote.record(FakeOperation::Clean);
        Ok(())
    }

    fn head(&self) -> Result<Option<CommitId>, GitError> {
        Ok(self.existing()?.head.clone())
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError> {
        let inner = lock(&self.remote.inner);
        inner.require(ancestor)?;
        inner.require(descendant)?;
        Ok(inner.is_ancestor(ancestor, descendant))
    }

    fn commits_between(
        &self,
        base: Option<&CommitId>,
        tip: &CommitId,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let inner = lock(&self.remote.inner);
        inner.require(tip)?;
        let hidden = match base {
            Some(base) => {
                inner.require(base)?;
                inner.reachable(std::iter::once(base.clone()))
            }
            None => HashSet::new(),
        };

        // Breadth-first from the tip gives newest-first order for linear
        // history and a stable order for merges.
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([tip.clone()]);
        let mut commits = Vec::new();
        while let Some(id) = queue.pop_front() {
            if hidden.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            let commit = inner.require(&id)?;
            commits.push(CommitInfo {
                id: id.clone(),
                summary: commit.message.lines().next().unwrap_or("").to_string(),
                author_name: commit.author.name.clone(),
                author_email: commit.author.email.clone(),
                author_time: commit.time,
            });
            queue.extend(commit.parents.iter().cloned());
        }
        Ok(commits)
    }

    fn add(&self, paths: &[&str]) -> Result<(), GitError> {
        self.existing()?
            .staged
            .extend(paths.iter().map(|p| p.to_string()));
        Ok(())
    }

    fn commit(&self, message: &str, signatures: &Signatures) -> Result<CommitId, GitError> {
        let mut state = self.existing()?;
        let parents: Vec<CommitId> = state.head.iter().cloned().collect();
        let id = lock(&self.remote.inner).create_commit(
            parents,
            signatures.author.clone(),
            message,
        );
        state.head = Some(id.clone());
        state.staged.clear();
        self.remote.record(FakeOperation::Commit(id.clone()));
        Ok(id)
    }

    fn branch(&self, name: &str, revision: &CommitId) -> Result<(), GitError> {
        let mut state = self.existing()?;
        lock(&self.remote.inner).require(revision)?;
        state.local_branches.insert(name.to_string(), revision.clone());
        Ok(())
    }

    fn tag(
        &self,
        name: &str,
        revision: &CommitId,
        _message: Option<&str>,
        _signatures: &Signatures,
        force: bool,
    ) -> Result<(), GitError> {
        let mut state = self.existing()?;
        lock(&self.remote.inner).require(revision)?;
        if !force && state.local_tags.contains_key(name) {
            return Err(GitError::Internal {
                message: format!("tag '{name}' already exists"),
            });
        }
        state.local_tags.insert(name.to_string(), revision.clone());
        Ok(())
    }

    fn merge(
        &self,
        ours: &CommitId,
        theirs: &CommitId,
        message: &str,
        signatures: &Signatures,
    ) -> Result<CommitId, GitError> {
        let state = self.existing()?;
        if state.conflict_on_merge {
            return Err(GitError::MergeConflict {
                ours: ours.short(12).to_string(),
                theirs: theirs.short(12).to_string(),
            });
        }
        let mut inner = lock(&self.remote.inner);
        inner.require(ours)?;
        inner.require(theirs)?;
        let id = inner.create_commit(
            vec![ours.clone(), theirs.clone()],
            signatures.author.clone(),
            message,
        );
        inner.operations.push(FakeOperation::Merge(id.clone()));
        Ok(id)
    }

    fn push(
        &self,
        remote: &str,
        revision: &CommitId,
        target: &TrackedRef,
        ctx: &OpContext,
    ) -> Result<(), GitError> {
        ctx.check("push")?;
        let state = self.existing()?;
        Self::require_remote(&state, remote, "push")?;

        let mut inner = lock(&self.remote.inner);
        if let Some(FailOn::Push(message)) = &inner.fail_on {
            return Err(GitError::Transport {
                operation: "push".to_string(),
                message: message.clone(),
            });
        }
        inner.require(revision)?;
        inner.operations.push(FakeOperation::Push {
            target: target.clone(),
            revision: revision.clone(),
        });

        if inner.racing_pushes > 0 {
            inner.racing_pushes -= 1;
            let author = inner
                .racing_author
                .clone()
                .unwrap_or_else(|| Identity {
                    name: "Concurrent".to_string(),
                    email: "concurrent@example.com".to_string(),
                });
            let parents: Vec<CommitId> = inner.refs.get(target).cloned().into_iter().collect();
            let racing = inner.create_commit(parents, author, "concurrent publish");
            inner.refs.insert(target.clone(), racing);
        }

        if let Some(current) = inner.refs.get(target) {
            if !inner.is_ancestor(current, revision) {
                return Err(GitError::NonFastForward {
                    target: target.full_name(),
                    message: format!(
                        "{} is not a descendant of {}",
                        revision.short(12),
                        current.short(12)
                    ),
                });
            }
        }
        inner.refs.insert(target.clone(), revision.clone());
        Ok(())
    }

    fn run_raw(
        &self,
        args: &[&str],
        _signatures: &Signatures,
        _ctx: &OpContext,
    ) -> Result<CommandOutput, GitError> {
        Err(GitError::Unsupported {
            operation: format!("git {}", args.join(" ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelToken;

    fn alice() -> Identity {
        Identity::new("Alice", "alice@example.com").unwrap()
    }

    fn ready_client(remote: &FakeRemote) -> FakeClient {
        let client = remote.client();
        client.init().unwrap();
        client.set_remote("origin", "fake://origin").unwrap();
        client
    }

    mod graph {
        use super::*;

        #[test]
        fn commits_chain_on_branch() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let b = remote.commit("master", &alice(), "b");

            assert_ne!(a, b);
            assert_eq!(remote.branch_tip("master"), Some(b.clone()));
            assert_eq!(remote.parents(&b), vec![a.clone()]);
            assert!(remote.is_ancestor(&a, &b));
            assert!(!remote.is_ancestor(&b, &a));
        }

        #[test]
        fn identical_content_gets_distinct_ids() {
            let remote = FakeRemote::new();
            let a = remote.commit_with_parents(&[], &alice(), "same");
            let b = remote.commit_with_parents(&[], &alice(), "same");
            assert_ne!(a, b);
        }
    }

    mod workspace {
        use super::*;

        #[test]
        fn operations_require_workspace() {
            let remote = FakeRemote::new();
            let client = remote.client();
            assert!(!client.workspace_exists());
            assert!(matches!(
                client.list_branches("origin"),
                Err(GitError::WorkspaceMissing { .. })
            ));
            assert!(matches!(
                client.fetch("origin", &OpContext::unbounded()),
                Err(GitError::WorkspaceMissing { .. })
            ));
        }

        #[test]
        fn fetch_snapshots_remote_refs() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let client = ready_client(&remote);
            client.fetch("origin", &OpContext::unbounded()).unwrap();

            remote.commit("master", &alice(), "b");
            let listed = client.list_branches("origin").unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].revision, a);
        }

        #[test]
        fn fetch_failure_is_transport_error() {
            let remote = FakeRemote::new();
            let client = ready_client(&remote);
            remote.fail_on(FailOn::Fetch("connection refused".into()));
            let err = client.fetch("origin", &OpContext::unbounded()).unwrap_err();
            assert!(matches!(err, GitError::Transport { .. }));
            assert!(err.to_string().contains("connection refused"));
        }

        #[test]
        fn cancelled_fetch() {
            let remote = FakeRemote::new();
            let client = ready_client(&remote);
            let token = CancelToken::new();
            token.cancel();
            assert!(matches!(
                client.fetch("origin", &OpContext::new(token)),
                Err(GitError::Cancelled { .. })
            ));
        }

        #[test]
        fn commit_builds_on_checkout() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let client = ready_client(&remote);
            client.checkout(&a).unwrap();
            client.add(&["out.txt"]).unwrap();
            let sigs = Signatures::single(alice());
            let b = client.commit("generated", &sigs).unwrap();

            assert_eq!(client.head().unwrap(), Some(b.clone()));
            assert_eq!(remote.parents(&b), vec![a.clone()]);
            assert!(client.staged().is_empty());

            let between = client.commits_between(Some(&a), &b).unwrap();
            assert_eq!(between.len(), 1);
            assert_eq!(between[0].summary, "generated");
        }

        #[test]
        fn run_raw_unsupported() {
            let remote = FakeRemote::new();
            let client = ready_client(&remote);
            let result = client.run_raw(
                &["status"],
                &Signatures::single(alice()),
                &OpContext::unbounded(),
            );
            assert!(matches!(result, Err(GitError::Unsupported { .. })));
        }
    }

    mod pushing {
        use super::*;

        #[test]
        fn push_creates_and_fast_forwards() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let client = ready_client(&remote);
            let target = TrackedRef::branch("integrate").unwrap();
            let ctx = OpContext::unbounded();

            client.push("origin", &a, &target, &ctx).unwrap();
            assert_eq!(remote.tip(&target), Some(a.clone()));

            let b = remote.commit_with_parents(&[a.clone()], &alice(), "b");
            client.push("origin", &b, &target, &ctx).unwrap();
            assert_eq!(remote.tip(&target), Some(b));
        }

        #[test]
        fn push_rejects_non_fast_forward() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let b = remote.commit("master", &alice(), "b");
            let client = ready_client(&remote);
            let master = TrackedRef::branch("master").unwrap();

            let err = client
                .push("origin", &a, &master, &OpContext::unbounded())
                .unwrap_err();
            assert!(matches!(err, GitError::NonFastForward { .. }));
            assert_eq!(remote.tip(&master), Some(b));
        }

        #[test]
        fn racing_publisher_wins_configured_pushes() {
            let remote = FakeRemote::new();
            let a = remote.commit("integrate", &alice(), "a");
            let client = ready_client(&remote);
            let target = TrackedRef::branch("integrate").unwrap();
            let local = remote.commit_with_parents(&[a.clone()], &alice(), "local");
            let bob = Identity::new("Bob", "bob@example.com").unwrap();
            remote.race_next_pushes(1, &bob);

            let ctx = OpContext::unbounded();
            assert!(matches!(
                client.push("origin", &local, &target, &ctx),
                Err(GitError::NonFastForward { .. })
            ));
            let racing = remote.tip(&target).unwrap();
            assert_eq!(remote.author(&racing), Some(bob));
            assert_eq!(remote.parents(&racing), vec![a]);

            let merged = remote.commit_with_parents(&[racing, local], &alice(), "merge");
            client.push("origin", &merged, &target, &ctx).unwrap();
            assert_eq!(remote.push_count(), 2);
        }

        #[test]
        fn merge_conflict_injection() {
            let remote = FakeRemote::new();
            let a = remote.commit("master", &alice(), "a");
            let b = remote.commit_with_parents(&[], &alice(), "b");
            let client = ready_client(&remote);
            client.set_conflict_on_merge(true);
            let result = client.merge(&a, &b, "merge", &Signatures::single(alice()));
            assert!(matches!(result, Err(GitError::MergeConflict { .. })));
        }
    }
}
