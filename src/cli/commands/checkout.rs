//! checkout command - put the workspace at a build's revision
//!
//! The workspace lock is held only while this command runs. The external
//! build step runs afterwards, followed by `record`.

use anyhow::Result;
use serde::Serialize;

use crate::cli::Context;
use crate::core::types::Branch;
use crate::engine::{Builder, Culprit, RevisionCheckout};

#[derive(Serialize)]
struct CheckoutReport<'a> {
    candidate: &'a Branch,
    culprits: &'a [Culprit],
    fetched: &'a [Branch],
}

/// Check out `candidate`, or the resolved candidate when None.
pub fn checkout(ctx: &Context, candidate: Option<&Branch>) -> Result<()> {
    let settings = ctx.settings()?;
    let client = super::workspace(&settings);
    let prepared = Builder::new(&settings, &client).prepare(candidate, &ctx.op_context(&settings))?;

    super::print_json(&CheckoutReport {
        candidate: &prepared.candidate,
        culprits: &prepared.culprits,
        fetched: &prepared.fetched,
    })
}
