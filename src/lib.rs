//! gitscm - change detection and safe publishing for git-backed CI
//!
//! gitscm decides when a project needs building, checks out exactly the
//! revision to build, and publishes build output to a shared integration
//! branch without ever force-pushing.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Poller, build checkout and publisher
//! - [`core`] - Domain types, ref selection, build state, config and locking
//! - [`git`] - Single interface for all Git operations
//!
//! # Correctness Invariants
//!
//! gitscm maintains the following invariants:
//!
//! 1. A poll that cannot reach the remote fails; it never reports "no changes"
//! 2. A successful build is recorded under its ref name; a failed one is not
//! 3. One operation at a time touches a project's workspace
//! 4. The integration ref only ever moves forward

pub mod cli;
pub mod core;
pub mod engine;
pub mod git;
