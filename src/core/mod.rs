//! core
//!
//! Core domain types, state, and configuration for gitscm.
//!
//! # Modules
//!
//! - [`types`] - Strong types: CommitId, TrackedRef, Branch, Identity
//! - [`spec`] - Branch specification parsing and ref matching
//! - [`select`] - Revision selection from the remote's refs
//! - [`state`] - Persisted build records
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Centralized path routing for a project's storage
//! - [`ops`] - Workspace locking
//! - [`cancel`] - Cancellation and deadlines
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Persisted state changes only after the operation it records succeeded

pub mod cancel;
pub mod config;
pub mod ops;
pub mod paths;
pub mod select;
pub mod spec;
pub mod state;
pub mod types;
