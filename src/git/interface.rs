//! git::interface
//!
//! [`RepositoryClient`] over a real on-disk workspace, using git2.
//!
//! # Architecture
//!
//! [`GitWorkspace`] is the only type in the crate that imports `git2`. It is
//! bound to a workspace path and opens the repository on every call, so it
//! holds no handles between operations and never observes stale state.
//!
//! # Remote operations
//!
//! - Fetch uses explicit refspecs (`+refs/heads/*:refs/remotes/<remote>/*`
//!   and `+refs/tags/*:refs/tags/*`) with pruning, so deleted and retargeted
//!   refs are reflected exactly.
//! - Push stages the revision under `refs/gitscm/publish/<target>` and pushes
//!   that ref without `+`. A push the remote cannot fast-forward comes back as
//!   [`GitError::NonFastForward`].
//! - The operation context is polled from the transfer callbacks, so a
//!   cancelled fetch stops at the next progress report.
//!
//! # Example
//!
//! ```ignore
//! use gitscm::git::{GitWorkspace, RepositoryClient};
//!
//! let client = GitWorkspace::new(paths.workspace_dir());
//! client.init()?;
//! client.set_remote("origin", "/srv/git/app.git")?;
//! client.fetch("origin", &ctx)?;
//! for branch in client.list_branches("origin")? {
//!     println!("{} {}", branch.reference, branch.revision.short(7));
//! }
//! ```

use std::cell::RefCell;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::core::cancel::OpContext;
use crate::core::types::{Branch, CommitId, Signatures, TrackedRef};
use crate::git::client::{CommandOutput, CommitInfo, GitError, RepositoryClient};

/// How often a running `git` child is checked for exit or cancellation.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Namespace for revisions staged for a push.
const PUBLISH_STAGING_PREFIX: &str = "refs/gitscm/publish/";

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") || context.contains("ref") {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    /// Classify a failed network operation.
    fn from_network(err: git2::Error, operation: &str, ctx: &OpContext) -> Self {
        // An aborted callback surfaces as a generic error; the context says why.
        if let Err(interrupted) = ctx.check(operation) {
            return interrupted.into();
        }
        if err.code() == git2::ErrorCode::Timeout {
            return GitError::TimedOut {
                operation: operation.to_string(),
                timeout: ctx.timeout().unwrap_or_default(),
            };
        }
        GitError::Transport {
            operation: operation.to_string(),
            message: err.message().to_string(),
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::RefNotFound {
                refname: err.message().to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: err.message().to_string(),
            },
        }
    }
}

/// Bound libgit2's connect and socket read/write waits.
///
/// Transfer callbacks never run while a connection is being set up, so a
/// stalled remote is only cut off by these transport timeouts. `None` (or
/// zero) restores libgit2's default of waiting indefinitely.
///
/// The setting is process-global. Call it before any thread uses git2.
pub fn set_transport_timeout(timeout: Option<Duration>) {
    let millis = transport_millis(timeout);
    // SAFETY: libgit2 options are plain globals; callers set them during
    // start-up before other threads touch git2. Neither call can fail.
    unsafe {
        let _ = git2::opts::set_server_connect_timeout_in_milliseconds(millis);
        let _ = git2::opts::set_server_timeout_in_milliseconds(millis);
    }
}

fn transport_millis(timeout: Option<Duration>) -> i32 {
    timeout
        .map(|t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX))
        .unwrap_or(0)
}

/// A git workspace on disk.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    path: PathBuf,
}

impl GitWorkspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<git2::Repository, GitError> {
        git2::Repository::open(&self.path).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => GitError::WorkspaceMissing {
                path: self.path.clone(),
            },
            _ => GitError::from_git2(e, &self.path.display().to_string()),
        })
    }

    fn head_commit<'r>(repo: &'r git2::Repository) -> Result<Option<git2::Commit<'r>>, GitError> {
        match repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(GitError::from_git2(e, "HEAD")),
        }
    }
}

fn to_oid(id: &CommitId) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(id.as_str()).map_err(|e| GitError::from_git2(e, id.as_str()))
}

fn from_oid(oid: git2::Oid) -> Result<CommitId, GitError> {
    Ok(CommitId::new(oid.to_string())?)
}

fn git_signatures(
    signatures: &Signatures,
) -> Result<(git2::Signature<'static>, git2::Signature<'static>), GitError> {
    let author = git2::Signature::now(&signatures.author.name, &signatures.author.email)?;
    let committer =
        git2::Signature::now(&signatures.committer.name, &signatures.committer.email)?;
    Ok((author, committer))
}

/// Callbacks carrying credentials from the ssh agent or git's credential helper.
fn remote_callbacks<'a>(repo: &git2::Repository) -> git2::RemoteCallbacks<'a> {
    let cfg = repo.config().ok();
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return git2::Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(cfg) = &cfg {
                if let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        git2::Cred::default()
    });
    callbacks
}

fn is_non_fast_forward(message: &str) -> bool {
    message.contains("non-fast-forward")
        || message.contains("non-fastforwardable")
        || message.contains("fetch first")
        || message.contains("not present locally")
}

impl RepositoryClient for GitWorkspace {
    fn workspace_exists(&self) -> bool {
        git2::Repository::open(&self.path).is_ok()
    }

    fn init(&self) -> Result<(), GitError> {
        git2::Repository::init(&self.path)
            .map_err(|e| GitError::from_git2(e, &self.path.display().to_string()))?;
        Ok(())
    }

    fn init_bare(&self) -> Result<(), GitError> {
        git2::Repository::init_bare(&self.path)
            .map_err(|e| GitError::from_git2(e, &self.path.display().to_string()))?;
        Ok(())
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        let repo = self.open()?;
        match repo.find_remote(name) {
            Ok(existing) => {
                if existing.url() != Some(url) {
                    repo.remote_set_url(name, url)?;
                }
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                repo.remote(name, url)?;
            }
            Err(e) => return Err(GitError::from_git2(e, name)),
        }
        Ok(())
    }

    fn fetch(&self, remote: &str, ctx: &OpContext) -> Result<(), GitError> {
        ctx.check("fetch")?;
        let repo = self.open()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|e| GitError::from_network(e, "fetch", ctx))?;

        let refspecs = [
            format!("+refs/heads/*:refs/remotes/{remote}/*"),
            "+refs/tags/*:refs/tags/*".to_string(),
        ];

        let mut callbacks = remote_callbacks(&repo);
        callbacks.transfer_progress(|_| !ctx.is_interrupted());
        callbacks.sideband_progress(|_| !ctx.is_interrupted());

        let mut options = git2::FetchOptions::new();
        options
            .remote_callbacks(callbacks)
            .prune(git2::FetchPrune::On)
            .download_tags(git2::AutotagOption::None);

        handle
            .fetch(&refspecs, Some(&mut options), Some("gitscm: fetch"))
            .map_err(|e| GitError::from_network(e, "fetch", ctx))?;

        ctx.check("fetch")?;
        Ok(())
    }

    fn list_branches(&self, remote: &str) -> Result<Vec<Branch>, GitError> {
        let repo = self.open()?;
        let tracking_prefix = format!("refs/remotes/{remote}/");
        let mut branches = Vec::new();

        for (glob, is_tag) in [(format!("{tracking_prefix}*"), false), ("refs/tags/*".to_string(), true)] {
            for reference in repo.references_glob(&glob)? {
                let reference = reference?;
                if reference.kind() == Some(git2::ReferenceType::Symbolic) {
                    continue;
                }
                let Some(name) = reference.name() else {
                    continue;
                };
                let short = if is_tag {
                    name.strip_prefix("refs/tags/")
                } else {
                    name.strip_prefix(tracking_prefix.as_str())
                };
                let Some(short) = short.filter(|s| *s != "HEAD") else {
                    continue;
                };
                let tracked = if is_tag {
                    TrackedRef::tag(short)
                } else {
                    TrackedRef::branch(short)
                };
                let Ok(tracked) = tracked else {
                    debug!(refname = name, "skipping ref with unsupported name");
                    continue;
                };
                // Tags on trees or blobs have no buildable revision.
                let Ok(commit) = reference.peel_to_commit() else {
                    debug!(refname = name, "skipping ref that does not point at a commit");
                    continue;
                };
                branches.push(Branch::new(tracked, from_oid(commit.id())?));
            }
        }

        Ok(branches)
    }

    fn checkout(&self, revision: &CommitId) -> Result<(), GitError> {
        let repo = self.open()?;
        let oid = to_oid(revision)?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;

        let mut builder = git2::build::CheckoutBuilder::new();
        builder.force();
        repo.checkout_tree(commit.as_object(), Some(&mut builder))?;
        repo.set_head_detached(oid)?;
        Ok(())
    }

    fn clean(&self) -> Result<(), GitError> {
        let repo = self.open()?;
        if let Some(head) = Self::head_commit(&repo)? {
            repo.reset(head.as_object(), git2::ResetType::Hard, None)?;
        }

        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::Internal {
                message: "cannot clean a bare repository".to_string(),
            })?
            .to_path_buf();

        let mut options = git2::StatusOptions::new();
        options
            .include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false);

        let leftovers: Vec<PathBuf> = repo
            .statuses(Some(&mut options))?
            .iter()
            .filter(|entry| {
                entry
                    .status()
                    .intersects(git2::Status::WT_NEW | git2::Status::IGNORED)
            })
            .filter_map(|entry| entry.path().map(|p| workdir.join(p)))
            .collect();

        for path in leftovers {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| GitError::Internal {
                message: format!("cannot remove {}: {}", path.display(), e),
            })?;
        }
        Ok(())
    }

    fn head(&self) -> Result<Option<CommitId>, GitError> {
        let repo = self.open()?;
        let head = Self::head_commit(&repo)?;
        head.map(|commit| from_oid(commit.id())).transpose()
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError> {
        // A commit is its own ancestor
        if ancestor == descendant {
            return Ok(true);
        }
        let repo = self.open()?;
        repo.graph_descendant_of(to_oid(descendant)?, to_oid(ancestor)?)
            .map_err(|e| GitError::from_git2(e, descendant.as_str()))
    }

    fn commits_between(
        &self,
        base: Option<&CommitId>,
        tip: &CommitId,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let repo = self.open()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;
        revwalk
            .push(to_oid(tip)?)
            .map_err(|e| GitError::from_git2(e, tip.as_str()))?;
        if let Some(base) = base {
            revwalk
                .hide(to_oid(base)?)
                .map_err(|e| GitError::from_git2(e, base.as_str()))?;
        }

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            let author = commit.author();
            let author_time = chrono::DateTime::from_timestamp(author.when().seconds(), 0)
                .unwrap_or(chrono::DateTime::UNIX_EPOCH);
            commits.push(CommitInfo {
                id: from_oid(commit.id())?,
                summary: commit.summary().unwrap_or("").to_string(),
                author_name: author.name().unwrap_or("").to_string(),
                author_email: author.email().unwrap_or("").to_string(),
                author_time,
            });
        }
        Ok(commits)
    }

    fn add(&self, paths: &[&str]) -> Result<(), GitError> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        index.add_all(paths.iter().copied(), git2::IndexAddOption::DEFAULT, None)?;
        // Stages deletions of tracked files as well.
        index.update_all(paths.iter().copied(), None)?;
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str, signatures: &Signatures) -> Result<CommitId, GitError> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let parent = Self::head_commit(&repo)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let (author, committer) = git_signatures(signatures)?;

        let oid = repo.commit(Some("HEAD"), &author, &committer, message, &tree, &parents)?;
        from_oid(oid)
    }

    fn branch(&self, name: &str, revision: &CommitId) -> Result<(), GitError> {
        let repo = self.open()?;
        let commit = repo
            .find_commit(to_oid(revision)?)
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;
        repo.branch(name, &commit, true)
            .map_err(|e| GitError::from_git2(e, name))?;
        Ok(())
    }

    fn tag(
        &self,
        name: &str,
        revision: &CommitId,
        message: Option<&str>,
        signatures: &Signatures,
        force: bool,
    ) -> Result<(), GitError> {
        let repo = self.open()?;
        let target = repo
            .find_object(to_oid(revision)?, None)
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;
        let result = match message {
            Some(message) => {
                let (_, tagger) = git_signatures(signatures)?;
                repo.tag(name, &target, &tagger, message, force)
            }
            None => repo.tag_lightweight(name, &target, force),
        };
        result.map_err(|e| GitError::from_git2(e, name))?;
        Ok(())
    }

    fn merge(
        &self,
        ours: &CommitId,
        theirs: &CommitId,
        message: &str,
        signatures: &Signatures,
    ) -> Result<CommitId, GitError> {
        let repo = self.open()?;
        let ours_commit = repo
            .find_commit(to_oid(ours)?)
            .map_err(|e| GitError::from_git2(e, ours.as_str()))?;
        let theirs_commit = repo
            .find_commit(to_oid(theirs)?)
            .map_err(|e| GitError::from_git2(e, theirs.as_str()))?;

        let mut index = repo.merge_commits(&ours_commit, &theirs_commit, None)?;
        if index.has_conflicts() {
            return Err(GitError::MergeConflict {
                ours: ours.short(12).to_string(),
                theirs: theirs.short(12).to_string(),
            });
        }

        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        let (author, committer) = git_signatures(signatures)?;
        let oid = repo.commit(
            None,
            &author,
            &committer,
            message,
            &tree,
            &[&ours_commit, &theirs_commit],
        )?;
        from_oid(oid)
    }

    fn push(
        &self,
        remote: &str,
        revision: &CommitId,
        target: &TrackedRef,
        ctx: &OpContext,
    ) -> Result<(), GitError> {
        ctx.check("push")?;
        let repo = self.open()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|e| GitError::from_network(e, "push", ctx))?;

        let staging = format!("{PUBLISH_STAGING_PREFIX}{}", target.name());
        repo.reference(&staging, to_oid(revision)?, true, "gitscm: stage publish")?;
        let refspec = format!("{staging}:{}", target.full_name());

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        let result = {
            let mut callbacks = remote_callbacks(&repo);
            callbacks.push_negotiation(|_| {
                if ctx.is_interrupted() {
                    Err(git2::Error::from_str("push interrupted"))
                } else {
                    Ok(())
                }
            });
            callbacks.push_update_reference(|_refname, status| {
                if let Some(message) = status {
                    *rejection.borrow_mut() = Some(message.to_string());
                }
                Ok(())
            });

            let mut options = git2::PushOptions::new();
            options.remote_callbacks(callbacks);
            handle.push(&[refspec.as_str()], Some(&mut options))
        };

        if let Ok(mut staged) = repo.find_reference(&staging) {
            let _ = staged.delete();
        }

        if let Err(e) = result {
            if e.code() == git2::ErrorCode::NotFastForward || is_non_fast_forward(e.message()) {
                return Err(GitError::NonFastForward {
                    target: target.full_name(),
                    message: e.message().to_string(),
                });
            }
            return Err(GitError::from_network(e, "push", ctx));
        }

        if let Some(message) = rejection.into_inner() {
            if is_non_fast_forward(&message) {
                return Err(GitError::NonFastForward {
                    target: target.full_name(),
                    message,
                });
            }
            return Err(GitError::Transport {
                operation: "push".to_string(),
                message: format!("remote rejected {}: {}", target, message),
            });
        }

        Ok(())
    }

    fn run_raw(
        &self,
        args: &[&str],
        signatures: &Signatures,
        ctx: &OpContext,
    ) -> Result<CommandOutput, GitError> {
        let command = format!("git {}", args.join(" "));
        if !self.workspace_exists() {
            return Err(GitError::WorkspaceMissing {
                path: self.path.clone(),
            });
        }
        ctx.check(&command)?;

        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .env("GIT_AUTHOR_NAME", &signatures.author.name)
            .env("GIT_AUTHOR_EMAIL", &signatures.author.email)
            .env("GIT_COMMITTER_NAME", &signatures.committer.name)
            .env("GIT_COMMITTER_EMAIL", &signatures.committer.email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GitError::Internal {
                message: format!("failed to run `{command}`: {e}"),
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            let exited = child.try_wait().map_err(|e| GitError::Internal {
                message: format!("failed to wait for `{command}`: {e}"),
            })?;
            if let Some(status) = exited {
                break status;
            }
            if let Err(interrupted) = ctx.check(&command) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(interrupted.into());
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(GitError::CommandFailed {
                command,
                code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

/// Read a child's pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}
