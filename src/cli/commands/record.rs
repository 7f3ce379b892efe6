//! record command - store a build's outcome

use anyhow::Result;
use serde_json::json;

use crate::cli::Context;
use crate::core::types::Branch;
use crate::engine::{BuildOutcome, Builder};

/// Record the outcome of build `build_number` of `built`.
pub fn record(ctx: &Context, built: &Branch, build_number: u64, failed: bool) -> Result<()> {
    let settings = ctx.settings()?;
    let client = super::workspace(&settings);
    let outcome = if failed {
        BuildOutcome::Failure
    } else {
        BuildOutcome::Success
    };

    Builder::new(&settings, &client).record(built, outcome, build_number, &ctx.op_context(&settings))?;
    super::print_json(&json!({
        "ref": built.reference,
        "revision": built.revision,
        "build_number": build_number,
        "outcome": outcome,
        "recorded": outcome == BuildOutcome::Success,
    }))
}
