//! core::ops
//!
//! Mutual exclusion for operations on a project's workspace.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive workspace lock
//!
//! # Architecture
//!
//! Every poll and every build:
//! 1. Acquires the exclusive workspace lock (waiting, subject to the
//!    operation's deadline and cancellation)
//! 2. Works on the workspace and the build state
//! 3. Releases the lock when the guard drops, including on error

pub mod lock;

pub use lock::{LockError, WorkspaceLock};
