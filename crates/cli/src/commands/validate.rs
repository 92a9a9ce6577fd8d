//! `fw-util validate IMAGE --config FILE`
//!
//! Checks an image against every layout of a partition map without touching
//! hardware.

use std::fs;

use anyhow::{Context as _, Result};
use fwutil_image::ImageDescriptorList;
use fwutil_update::FwStatus;
use tracing::info;

use crate::commands::{Context, ValidateArgs, display};
use crate::error::CliError;
use crate::output;

pub fn execute(args: &ValidateArgs, ctx: &Context) -> Result<FwStatus> {
    let layouts = ImageDescriptorList::from_path(&args.config).map_err(CliError::from)?;
    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;

    let verdicts: Vec<_> = layouts
        .iter()
        .map(|layout| {
            let verdict = layout.check(&image).map_err(|rejection| rejection.to_string());
            (layout.name().to_owned(), verdict)
        })
        .collect();
    let valid = verdicts.iter().any(|(_, verdict)| verdict.is_ok());
    info!(image = %args.image.display(), layouts = verdicts.len(), valid, "image validated");

    output::print_validation(&display(&args.image), &verdicts, ctx.json);
    Ok(if valid {
        FwStatus::Success
    } else {
        FwStatus::Failure
    })
}
