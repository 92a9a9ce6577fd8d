//! `fw-util dump FRU COMPONENT PATH`

use anyhow::Result;
use fwutil_update::prelude::*;
use serde_json::json;
use tracing::info;

use crate::commands::{Context, DumpArgs, single};
use crate::error::CliError;

pub fn execute(args: &DumpArgs, ctx: &Context) -> Result<FwStatus> {
    let registry = ctx.registry(&StopFlag::new())?;
    let component = single(&registry, &args.fru, &args.component)?;

    match component.dump(&args.out) {
        Ok(()) => {
            info!(component = %component.id(), out = %args.out.display(), "firmware dumped");
            if ctx.json {
                let out = json!({"success": true, "component": component.id(), "path": args.out});
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Dumped {} to {}", component.id(), args.out.display());
            }
            Ok(FwStatus::Success)
        }
        Err(e) => Err(CliError::Update(e).into()),
    }
}
