//! `fw-util update FRU COMPONENT IMAGE [--force]`

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use fwutil_update::prelude::*;
use tracing::{debug, info, warn};

use crate::commands::{Context, UpdateArgs, single};
use crate::error::CliError;
use crate::output;

/// Per-FRU lock file holding the owner's pid; removed on drop.
#[derive(Debug)]
struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    /// Take the lock for `fru`, reclaiming it once if its holder is gone.
    fn acquire(dir: &Path, fru: &str) -> Result<Self, CliError> {
        let path = lock_path_in(dir, fru);
        if let Some(lock) = Self::create(&path)? {
            return Ok(lock);
        }
        let locked = |path: PathBuf| CliError::Locked {
            fru: fru.to_owned(),
            holder: Self::holder(&path),
            path,
        };
        if !Self::is_stale(&path) {
            return Err(locked(path));
        }

        warn!(path = %path.display(), "removing stale update lock");
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "stale lock already removed");
            }
            Err(e) => return Err(e.into()),
        }
        match Self::create(&path)? {
            Some(lock) => Ok(lock),
            None => Err(locked(path)),
        }
    }

    /// `None` when the file already exists.
    fn create(path: &Path) -> Result<Option<Self>, CliError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %lock.path.display(), "update lock taken");
        Ok(Some(lock))
    }

    /// Pid recorded in the lock file.
    fn holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Whether the pid recorded in `path` no longer runs.
    fn is_stale(path: &Path) -> bool {
        Self::holder(path).is_some_and(|pid| !Path::new("/proc").join(pid.to_string()).exists())
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove update lock");
        }
    }
}

/// Run the update and report it. The returned status is the exit status.
pub fn execute(args: &UpdateArgs, ctx: &Context) -> Result<FwStatus> {
    let stop = StopFlag::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).context("failed to install Ctrl-C handler")?;

    let registry = ctx.registry(&stop)?;
    let component = single(&registry, &args.fru, &args.component)?;
    let _lock = UpdateLock::acquire(&ctx.lock_dir, &component.id().fru)?;

    info!(
        component = %component.id(),
        image = %args.image.display(),
        force = args.force,
        "update requested"
    );
    let report = if args.force {
        component.force_update(&args.image)
    } else {
        component.update(&args.image)
    };

    output::print_report(&report, ctx.json);
    Ok(report.status())
}
