//! Error types for snapshot acquisition.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while acquiring a snapshot.
///
/// Every variant is terminal for an `acquire` call. Whether to fall back to a
/// full sync is left to the caller.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// The index listing could not be fetched or did not look like a listing.
    #[error("Backup discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },

    /// The index listing contained no valid backup names.
    #[error("No backup available at {0}")]
    NoBackupAvailable(String),

    /// The archive transfer failed or was incomplete.
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// The archive could not be unpacked into the target directory.
    #[error("Extraction into {path} failed: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// Another acquisition holds the lock on the target directory.
    #[error("Target directory {0} is locked by another acquisition")]
    TargetLocked(PathBuf),

    /// The HTTP client could not be initialized.
    #[error("Failed to initialize HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl AcquireError {
    /// Short, stable name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquireError::Discovery { .. } => "discovery",
            AcquireError::NoBackupAvailable(_) => "no_backup_available",
            AcquireError::Download { .. } => "download",
            AcquireError::Extraction { .. } => "extraction",
            AcquireError::TargetLocked(_) => "target_locked",
            AcquireError::Client(_) => "client",
        }
    }

    pub(crate) fn discovery(url: &str, reason: impl ToString) -> Self {
        AcquireError::Discovery {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        AcquireError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AcquireError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
