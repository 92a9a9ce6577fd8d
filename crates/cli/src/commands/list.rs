//! `fw-util list`

use anyhow::Result;
use fwutil_update::prelude::*;

use crate::commands::Context;
use crate::output;

pub fn execute(ctx: &Context) -> Result<FwStatus> {
    let registry = ctx.registry(&StopFlag::new())?;
    output::print_list(&registry, ctx.json);
    Ok(FwStatus::Success)
}
