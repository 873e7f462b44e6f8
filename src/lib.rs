//! tronsnap - Discover, download and stage TRON lite full node snapshots
//!
//! This library finds the newest `backupYYYYMMDD` directory on a snapshot
//! mirror, downloads its `LiteFullNode_output-directory.tgz` archive and
//! extracts it into the node's data directory.
//!
//! # Features
//!
//! - **Tolerant Discovery**: Only `backup` + eight-digit date tokens are trusted;
//!   everything else in the index page is ignored
//! - **Calendar Selection**: The latest backup is chosen by real date comparison
//! - **Atomic Downloads**: Archives are streamed to a `.partial` file and renamed
//!   only after size (and MD5, when available) verification
//! - **Atomic Extraction**: Datasets are unpacked into a staging directory and
//!   swapped into place, so the target is either complete or untouched
//! - **Automatic Retry**: Bounded exponential backoff for network operations
//!
//! # Example
//!
//! ```no_run
//! use tronsnap::{AcquireConfig, SnapshotAcquirer};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let acquirer = SnapshotAcquirer::new(AcquireConfig::default())?;
//! let dataset = acquirer
//!     .acquire(
//!         "http://34.86.86.229/",
//!         Path::new("/tmp/LiteFullNode_output-directory.tgz"),
//!         Path::new("/home/java-tron/output-directory"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
mod extract;
mod index;
mod listing;
mod lock;
mod orchestrator;
mod progress;
mod retry;
mod types;

pub use error::AcquireError;
pub use listing::{parse_listing, select_latest};
pub use orchestrator::{SnapshotAcquirer, StageOutcome};
pub use types::{
    AcquireConfig, ArchiveFile, BackupId, DatasetDirectory, ExecutionStage, RetryPolicy,
    SelectedBackup, ARCHIVE_NAME, BACKUP_PREFIX, MARKER_FILE,
};
