//! publish command - push the workspace HEAD to the integration ref

use anyhow::Result;

use crate::cli::Context;
use crate::core::types::Branch;
use crate::engine::{PostBuildAction, Publisher};

pub fn publish(ctx: &Context, built: &Branch, build_number: u64) -> Result<()> {
    let settings = ctx.settings()?;
    let client = super::workspace(&settings);
    let outcome = Publisher::new(&settings, &client)?.perform(
        built,
        build_number,
        &ctx.op_context(&settings),
    )?;
    super::print_json(&outcome)
}
