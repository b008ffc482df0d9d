//! Error taxonomy for the kiosk core
//!
//! Commands use `anyhow` and add context; these enums exist so callers can
//! decide between retry, warn and abort on the kind of failure.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Orientation, TargetId};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Target was never provisioned
    #[error("kiosk target '{0}' is not provisioned")]
    NotFound(TargetId),

    #[error("invalid target id '{0}' (use lowercase letters, digits, '-' or '_')")]
    InvalidId(String),

    #[error("malformed record {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrientationError {
    /// Display tool missing or not ready within the bounded wait
    #[error("display tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Re-query after apply did not report the requested transform
    #[error("output {output} reports {reported} after requesting {requested}")]
    VerificationFailed {
        output: String,
        requested: Orientation,
        reported: String,
    },

    #[error("unknown orientation '{0}'")]
    UnknownOrientation(String),

    /// The tool ran but the transform call itself failed
    #[error("display tool failed: {0:#}")]
    Tool(anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum KioskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Target exists but cannot be launched (blank URL)
    #[error("kiosk target '{0}' has no URL configured")]
    TargetNotConfigured(TargetId),

    /// Service manager or browser control failure
    #[error(transparent)]
    External(#[from] anyhow::Error),
}
