//! Error types for the fw-util CLI

use std::path::PathBuf;

use fwutil_image::ConfigError;
use fwutil_update::{FwStatus, UpdateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid component table: {0}")]
    InvalidTable(String),

    #[error("No component '{component}' on FRU '{fru}'")]
    ComponentNotFound { fru: String, component: String },

    #[error(
        "An update of FRU '{fru}' is already running (lock file {}{})",
        .path.display(),
        holder_suffix(.holder)
    )]
    Locked {
        fru: String,
        path: PathBuf,
        holder: Option<u32>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Partition config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

impl CliError {
    /// Status an operator sees for this error.
    pub fn status(&self) -> FwStatus {
        match self {
            Self::Update(e) => e.reason().status(),
            _ => FwStatus::Failure,
        }
    }
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder.map(|pid| format!(", held by pid {pid}")).unwrap_or_default()
}
