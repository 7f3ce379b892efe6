//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Loads the project settings and opens the workspace client
//! 2. Calls the engine
//! 3. Prints the result as JSON on stdout
//!
//! Logs go to stderr, so stdout stays machine-readable.

mod checkout;
mod poll;
mod publish;
mod record;
mod status;

pub use checkout::checkout;
pub use poll::poll;
pub use publish::publish;
pub use record::record;
pub use status::status;

use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::cli::args::{Command, RevisionArgs};
use crate::cli::Context;
use crate::core::config::ProjectSettings;
use crate::core::types::{Branch, CommitId, TrackedRef};
use crate::git::GitWorkspace;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Poll => poll::poll(ctx),
        Command::Checkout {
            reference,
            revision,
        } => {
            let candidate = match (reference, revision) {
                (Some(reference), Some(revision)) => Some(parse_branch(&reference, &revision)?),
                _ => None,
            };
            checkout::checkout(ctx, candidate.as_ref())
        }
        Command::Record {
            target,
            build_number,
            failed,
        } => record::record(ctx, &target.to_branch()?, build_number, failed),
        Command::Publish {
            target,
            build_number,
        } => publish::publish(ctx, &target.to_branch()?, build_number),
        Command::Status => status::status(ctx),
    }
}

impl RevisionArgs {
    fn to_branch(&self) -> Result<Branch> {
        parse_branch(&self.reference, &self.revision)
    }
}

/// Parse a ref argument; a bare name is a branch.
fn parse_ref(input: &str) -> Result<TrackedRef> {
    let parsed = if input.starts_with("refs/") {
        TrackedRef::parse(input)
    } else {
        TrackedRef::branch(input)
    };
    parsed.with_context(|| format!("invalid ref '{input}'"))
}

fn parse_branch(reference: &str, revision: &str) -> Result<Branch> {
    let reference = parse_ref(reference)?;
    let revision = CommitId::new(revision).with_context(|| format!("invalid revision '{revision}'"))?;
    Ok(Branch::new(reference, revision))
}

fn workspace(settings: &ProjectSettings) -> GitWorkspace {
    GitWorkspace::new(settings.paths.workspace_dir())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialising output")?;
    println!("{json}");
    Ok(())
}
