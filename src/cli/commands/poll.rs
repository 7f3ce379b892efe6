//! poll command - fetch and report whether anything needs building

use anyhow::Result;

use crate::cli::Context;
use crate::engine::{ChangeSource, Poller};

/// Print the poll result as JSON.
pub fn poll(ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    let client = super::workspace(&settings);
    let result = Poller::new(&settings, &client).poll(&ctx.op_context(&settings))?;
    super::print_json(&result)
}
