//! fw-util - BMC component firmware utility
//!
//! Updates, dumps and reports the firmware of every component listed in the
//! platform's component table: host BIOS, BMC flash, CPLDs, voltage
//! regulators and other parts behind bridge controllers.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;
mod platform;
mod table;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fwutil_update::{FwStatus, LOCK_DIR};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Context, DumpArgs, UpdateArgs, ValidateArgs, VersionArgs};
use crate::error::CliError;
use crate::table::DEFAULT_TABLE;

#[derive(Parser)]
#[command(name = "fw-util")]
#[command(about = "BMC firmware utility - update, dump and report component firmware")]
#[command(version)]
#[command(long_about = "
fw-util writes firmware images into the components of this platform and
reports what is installed. Components are addressed as FRU and component
name, for example `fw-util update slot1 bios image.bin`.

Updates validate the image first unless --force is given, sequence host power
and the management engine as the component requires, and always try to leave
the host powered on.

Exit status: 0 success, 1 failure, 2 usage error, 3 not supported.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(long, global = true, help = "Output in JSON format for machine parsing")]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Component table
    #[arg(long, global = true, env = "FW_UTIL_TABLE", default_value = DEFAULT_TABLE)]
    table: PathBuf,

    /// Directory for per-FRU update locks (for testing)
    #[arg(long, global = true, env = "FW_UTIL_LOCK_DIR", default_value = LOCK_DIR, hide = true)]
    lock_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a firmware image into a component
    Update(UpdateArgs),

    /// Show installed firmware versions
    Version(VersionArgs),

    /// Copy a component's flash contents to a file
    Dump(DumpArgs),

    /// List configured components and aliases
    List,

    /// Check an image against a partition map without writing it
    Validate(ValidateArgs),
}

fn exit_status(status: FwStatus) -> u8 {
    match status {
        FwStatus::Success => 0,
        FwStatus::Failure => 1,
        FwStatus::NotSupported => 3,
    }
}

fn exit_code(status: FwStatus) -> ExitCode {
    ExitCode::from(exit_status(status))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fw_util={log_level},fwutil_update={log_level},fwutil_image={log_level}")
                    .into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(status) => exit_code(status),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let status = match e.downcast_ref::<CliError>() {
                Some(cli_error) => cli_error.status(),
                None => FwStatus::Failure,
            };
            exit_code(status)
        }
    }
}

fn execute_command(cli: &Cli) -> Result<FwStatus> {
    let ctx = Context {
        json: cli.json,
        table: cli.table.clone(),
        lock_dir: cli.lock_dir.clone(),
    };
    match &cli.command {
        Commands::Update(args) => commands::update::execute(args, &ctx),
        Commands::Version(args) => commands::version::execute(args, &ctx),
        Commands::Dump(args) => commands::dump::execute(args, &ctx),
        Commands::List => commands::list::execute(&ctx),
        Commands::Validate(args) => commands::validate::execute(args, &ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_update_with_force() -> TestResult {
        let cli = Cli::try_parse_from(["fw-util", "update", "slot1", "bios", "/tmp/bios.bin", "--force"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        let Commands::Update(args) = cli.command else {
            return Err("expected update".into());
        };
        assert_eq!(args.fru, "slot1");
        assert_eq!(args.component, "bios");
        assert_eq!(args.image, PathBuf::from("/tmp/bios.bin"));
        assert!(args.force);
        Ok(())
    }

    #[test]
    fn parse_version_defaults_to_all() -> TestResult {
        let cli = Cli::try_parse_from(["fw-util", "version"])?;
        let Commands::Version(args) = cli.command else {
            return Err("expected version".into());
        };
        assert_eq!(args.fru, "all");
        assert_eq!(args.component, "all");
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from([
            "fw-util", "list", "--json", "-vv", "--table", "/tmp/table.json",
        ])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.table, PathBuf::from("/tmp/table.json"));
        Ok(())
    }

    #[test]
    fn parse_update_requires_image() {
        let result = Cli::try_parse_from(["fw-util", "update", "slot1", "bios"]);
        assert!(matches!(result, Err(e) if e.kind() == clap::error::ErrorKind::MissingRequiredArgument));
    }

    #[test]
    fn parse_validate_requires_config() {
        let result = Cli::try_parse_from(["fw-util", "validate", "/tmp/image"]);
        assert!(matches!(result, Err(e) if e.kind() == clap::error::ErrorKind::MissingRequiredArgument));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_eq!(exit_status(FwStatus::Success), 0);
        assert_eq!(exit_status(FwStatus::Failure), 1);
        assert_eq!(exit_status(FwStatus::NotSupported), 3);
    }
}
