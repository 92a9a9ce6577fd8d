//! `fw-util version [FRU|all] [COMPONENT|all]`

use std::io;

use anyhow::Result;
use fwutil_update::prelude::*;
use tracing::debug;

use crate::commands::{Context, VersionArgs};
use crate::error::CliError;
use crate::output::{self, VersionLine};

/// Print versions. Components without version support are skipped under a
/// wildcard and reported as not supported when named explicitly.
pub fn execute(args: &VersionArgs, ctx: &Context) -> Result<FwStatus> {
    let registry = ctx.registry(&StopFlag::new())?;
    let explicit = args.fru != ALL && args.component != ALL;
    let selected = registry.select(&args.fru, &args.component);
    if selected.is_empty() {
        return Err(CliError::ComponentNotFound {
            fru: args.fru.clone(),
            component: args.component.clone(),
        }
        .into());
    }

    let mut status = FwStatus::Success;
    let mut lines = Vec::new();
    let stdout = io::stdout();
    for component in selected {
        if ctx.json {
            match component.get_version() {
                Err(UpdateError::NotSupported { .. }) if !explicit => {
                    debug!(component = %component.id(), "no version support, skipped");
                }
                Err(e @ UpdateError::NotSupported { .. }) => {
                    status = FwStatus::NotSupported;
                    lines.push(VersionLine {
                        component: component.id().clone(),
                        version: Err(e.to_string()),
                    });
                }
                result => lines.push(VersionLine {
                    component: component.id().clone(),
                    version: result.map_err(|e| e.to_string()),
                }),
            }
            continue;
        }

        match component.print_version(&mut stdout.lock()) {
            Ok(()) => {}
            Err(UpdateError::NotSupported { .. }) if !explicit => {
                debug!(component = %component.id(), "no version support, skipped");
            }
            Err(e @ UpdateError::NotSupported { .. }) => {
                eprintln!("{e}");
                status = FwStatus::NotSupported;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if ctx.json {
        output::print_versions_json(&lines);
    }
    Ok(status)
}
