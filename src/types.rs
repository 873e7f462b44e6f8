//! Data structures for snapshot acquisition.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// File name of the archive published inside every backup directory.
pub const ARCHIVE_NAME: &str = "LiteFullNode_output-directory.tgz";

/// Prefix shared by every backup directory on the mirror.
pub const BACKUP_PREFIX: &str = "backup";

/// Name of the marker file written into a complete dataset directory.
pub const MARKER_FILE: &str = ".tronsnap.json";

/// A backup listed by the mirror, identified by its creation date.
///
/// Ordering is calendar order of `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId {
    pub date: NaiveDate,
}

impl BackupId {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }

    /// Directory name on the mirror, e.g. `backup20250715`.
    pub fn name(&self) -> String {
        format!("{}{}", BACKUP_PREFIX, self.date.format("%Y%m%d"))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The backup chosen for download, together with the URL of its archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedBackup {
    pub backup: BackupId,
    pub archive_url: String,
}

impl SelectedBackup {
    /// Derives `<base>/backupYYYYMMDD/LiteFullNode_output-directory.tgz`.
    pub fn new(base_url: &str, backup: BackupId) -> Self {
        let archive_url = format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            backup.name(),
            ARCHIVE_NAME
        );
        Self {
            backup,
            archive_url,
        }
    }
}

/// A fully downloaded archive at its final staging path.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub backup: BackupId,
    pub url: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: Option<String>,
}

/// An extracted dataset ready to be handed to the node.
#[derive(Debug, Clone)]
pub struct DatasetDirectory {
    pub path: PathBuf,
    pub backup: BackupId,
    /// Number of archive entries unpacked into `path`.
    pub entries: u64,
    /// True when a previous run's dataset was kept instead of re-downloading.
    pub reused: bool,
}

/// Contents of [`MARKER_FILE`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapshotMarker {
    pub backup: String,
    pub source_url: String,
    pub archive_bytes: u64,
    pub entries: u64,
    pub extracted_at: String,
}

/// Bounded exponential backoff for network operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`crate::SnapshotAcquirer`].
///
/// # Example
///
/// ```
/// use tronsnap::{AcquireConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = AcquireConfig {
///     retry: RetryPolicy {
///         max_attempts: 5,
///         base_delay: Duration::from_millis(500),
///         max_delay: Duration::from_secs(10),
///     },
///     force: true,
///     ..AcquireConfig::default()
/// };
/// assert_eq!(config.retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    /// Timeout for the index request. Archive downloads have no overall timeout.
    pub index_timeout: Duration,
    /// Longest wait for any single read; a stalled transfer fails after this
    /// and is retried like a dropped connection.
    pub read_timeout: Duration,
    /// Re-download even if the target already holds the selected backup.
    pub force: bool,
    /// Leave the downloaded archive in place after a successful extraction.
    pub keep_archive: bool,
    pub show_progress: bool,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            index_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            force: false,
            keep_archive: false,
            show_progress: false,
        }
    }
}

/// Stage control for the acquisition process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    /// List, download and extract
    All,
    /// Only list candidates and report the latest
    ListOnly,
    /// Stop after the archive is downloaded
    DownloadOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(y: i32, m: u32, d: u32) -> BackupId {
        BackupId::new(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_backup_name_is_zero_padded() {
        assert_eq!(id(2025, 1, 5).name(), "backup20250105");
    }

    #[test]
    fn test_archive_url_handles_trailing_slash() {
        let with = SelectedBackup::new("http://host/", id(2025, 7, 15));
        let without = SelectedBackup::new("http://host", id(2025, 7, 15));
        assert_eq!(
            with.archive_url,
            "http://host/backup20250715/LiteFullNode_output-directory.tgz"
        );
        assert_eq!(with, without);
    }

    #[test]
    fn test_default_config_bounds_every_read() {
        let config = AcquireConfig::default();
        assert!(config.read_timeout > Duration::ZERO);
        assert!(config.read_timeout <= config.index_timeout);
    }
}
