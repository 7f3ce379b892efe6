//! core::ops::lock
//!
//! Exclusive per-workspace lock.
//!
//! # Architecture
//!
//! A project's workspace is a single mutable resource: a poll and a build,
//! or two builds, must never touch it at the same time. Every operation on a
//! workspace runs while holding a [`WorkspaceLock`].
//!
//! The lock file sits at `<root>/workspace.lock` (see
//! [`ProjectPaths::lock_file`]), outside the workspace itself. Different
//! projects use different files and never contend.
//!
//! # Invariants
//!
//! - The lock is held for the whole poll or build
//! - The lock is released on drop (RAII), including on error and cancellation
//! - [`WorkspaceLock::acquire`] blocks until the lock is free, the operation is
//!   cancelled, or its deadline passes
//!
//! # Example
//!
//! ```ignore
//! use gitscm::core::ops::lock::WorkspaceLock;
//!
//! let lock = WorkspaceLock::acquire(&paths, &ctx)?;
//! // ... fetch, compare, checkout ...
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;

use crate::core::cancel::{Interrupted, OpContext};
use crate::core::paths::ProjectPaths;

/// How long to sleep between attempts while waiting for the lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another operation holds the lock (non-blocking attempts only).
    #[error("workspace is locked by another operation")]
    AlreadyLocked,

    /// Gave up waiting for the lock.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on one project's workspace.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    /// When this is Some, we hold the lock.
    file: Option<File>,
}

impl WorkspaceLock {
    /// Acquire the lock, waiting for other holders to finish.
    ///
    /// # Errors
    ///
    /// - [`LockError::Interrupted`] if `ctx` is cancelled or its deadline passes
    ///   while waiting
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    pub fn acquire(paths: &ProjectPaths, ctx: &OpContext) -> Result<Self, LockError> {
        loop {
            ctx.check("acquire workspace lock")?;
            match Self::try_acquire(paths)? {
                Some(lock) => return Ok(lock),
                None => thread::sleep(RETRY_INTERVAL),
            }
        }
    }

    /// Try to acquire the lock once, returning None if already held.
    pub fn try_acquire(paths: &ProjectPaths) -> Result<Option<Self>, LockError> {
        let root = paths.root();
        fs::create_dir_all(root).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", root.display(), e))
        })?;

        let path = paths.lock_file();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                path,
                file: Some(file),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            // fs2 reports contention as a raw OS error on some platforms.
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before the guard goes out of scope.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelToken;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn test_paths(dir: &Path) -> ProjectPaths {
        ProjectPaths::new(dir.join("project"))
    }

    #[test]
    fn acquire_succeeds_and_creates_root() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = test_paths(temp.path());

        let lock = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).expect("acquire");
        assert!(lock.is_held());
        assert_eq!(lock.path(), paths.lock_file());
        assert!(paths.root().is_dir());
        assert!(!paths.workspace_dir().exists());
    }

    #[test]
    fn try_acquire_returns_none_when_locked() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());

        let _held = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();
        assert!(WorkspaceLock::try_acquire(&paths).unwrap().is_none());
    }

    #[test]
    fn released_on_drop() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());

        {
            let _lock = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();
        }
        assert!(WorkspaceLock::try_acquire(&paths).unwrap().is_some());
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());

        let mut lock = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();
        lock.release().expect("first release");
        lock.release().expect("second release");
        assert!(!lock.is_held());
        assert!(WorkspaceLock::try_acquire(&paths).unwrap().is_some());
    }

    #[test]
    fn waiting_acquire_times_out() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());

        let _held = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();
        let ctx = OpContext::unbounded().with_timeout(Duration::from_millis(100));
        let result = WorkspaceLock::acquire(&paths, &ctx);
        assert!(matches!(
            result,
            Err(LockError::Interrupted(Interrupted::TimedOut { .. }))
        ));
    }

    #[test]
    fn waiting_acquire_observes_cancellation() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());

        let _held = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = WorkspaceLock::acquire(&paths, &OpContext::new(token));
        assert!(matches!(
            result,
            Err(LockError::Interrupted(Interrupted::Cancelled { .. }))
        ));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(temp.path());
        let held = WorkspaceLock::acquire(&paths, &OpContext::unbounded()).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_paths = paths.clone();
        let waiter = thread::spawn(move || {
            let ctx = OpContext::unbounded().with_timeout(Duration::from_secs(10));
            let lock = WorkspaceLock::acquire(&waiter_paths, &ctx);
            tx.send(lock.is_ok()).unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err(), "waiter must block while lock is held");
        drop(held);

        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        waiter.join().unwrap();
    }
}
