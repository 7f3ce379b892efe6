//! status command - show what was built under each ref

use anyhow::Result;
use serde::Serialize;

use crate::cli::Context;
use crate::core::state::{BuildRecord, BuildStateStore};
use crate::core::types::TrackedRef;
use crate::git::RepositoryClient;

#[derive(Serialize)]
struct StatusReport<'a> {
    url: &'a str,
    workspace: String,
    workspace_exists: bool,
    last_built: Option<&'a TrackedRef>,
    records: Vec<&'a BuildRecord>,
}

/// Print the build state store. Reads only; takes no lock.
pub fn status(ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    let store = BuildStateStore::open(settings.paths.state_file(), settings.history_limit)?;
    let client = super::workspace(&settings);

    super::print_json(&StatusReport {
        url: &settings.url,
        workspace: client.path().display().to_string(),
        workspace_exists: client.workspace_exists(),
        last_built: store.last_built().map(|r| &r.reference),
        records: store.records().collect(),
    })
}
