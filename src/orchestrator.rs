//! Main orchestration logic for acquiring a snapshot.

use crate::download::fetch_archive;
use crate::error::AcquireError;
use crate::extract::{extract_archive, read_marker};
use crate::index;
use crate::listing;
use crate::lock::TargetLock;
use crate::types::{
    AcquireConfig, ArchiveFile, BackupId, DatasetDirectory, ExecutionStage, SelectedBackup,
};
use reqwest::Client;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Removes the downloaded archive when it goes out of scope, unless kept.
struct ArchiveCleanup {
    path: PathBuf,
    keep: bool,
}

impl Drop for ArchiveCleanup {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed archive {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

/// Result of [`SnapshotAcquirer::run`], depending on the stage.
#[derive(Debug)]
pub enum StageOutcome {
    Listed {
        candidates: BTreeSet<BackupId>,
        latest: SelectedBackup,
    },
    Downloaded(ArchiveFile),
    Extracted(DatasetDirectory),
}

/// Discovers, downloads and stages node database snapshots.
pub struct SnapshotAcquirer {
    client: Client,
    config: AcquireConfig,
}

impl SnapshotAcquirer {
    pub fn new(config: AcquireConfig) -> Result<Self, AcquireError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(concat!("tronsnap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AcquireConfig {
        &self.config
    }

    /// Fetches the index page and returns every valid backup it lists.
    pub async fn list_candidates(
        &self,
        index_url: &str,
    ) -> Result<BTreeSet<BackupId>, AcquireError> {
        index::list_candidates(&self.client, index_url, &self.config).await
    }

    /// Picks the newest backup and derives its archive URL from `index_url`.
    pub fn select_latest(
        &self,
        candidates: &BTreeSet<BackupId>,
        index_url: &str,
    ) -> Result<SelectedBackup, AcquireError> {
        let latest = listing::select_latest(candidates, index_url)?;
        let selected = SelectedBackup::new(index_url, latest);
        info!("Found latest backup: {} ({})", latest, selected.archive_url);
        Ok(selected)
    }

    /// Downloads the archive of `selected` to `destination`.
    pub async fn fetch_archive(
        &self,
        selected: &SelectedBackup,
        destination: &Path,
    ) -> Result<ArchiveFile, AcquireError> {
        fetch_archive(&self.client, selected, destination, &self.config).await
    }

    /// Extracts `archive` into `target_dir` under the target lock.
    pub async fn extract(
        &self,
        archive: &ArchiveFile,
        target_dir: &Path,
    ) -> Result<DatasetDirectory, AcquireError> {
        let _lock = TargetLock::acquire(target_dir)?;
        extract_archive(archive, target_dir, &self.config).await
    }

    /// Produces a ready-to-use dataset at `target_dir`.
    ///
    /// Steps:
    ///
    /// 1. Locks `target_dir` for the whole call
    /// 2. Lists the backups on the mirror and selects the newest
    /// 3. Returns the existing dataset if it already holds that backup
    ///    (unless `force` is set)
    /// 4. Downloads the archive to `destination`
    /// 5. Extracts it into `target_dir`, replacing any previous dataset
    /// 6. Removes the archive (unless `keep_archive` is set)
    ///
    /// On failure `target_dir` is unchanged.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tronsnap::{AcquireConfig, SnapshotAcquirer};
    /// use std::path::Path;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let acquirer = SnapshotAcquirer::new(AcquireConfig::default())?;
    /// let dataset = acquirer
    ///     .acquire(
    ///         "http://34.86.86.229/",
    ///         Path::new("/tmp/LiteFullNode_output-directory.tgz"),
    ///         Path::new("/home/java-tron/output-directory"),
    ///     )
    ///     .await?;
    /// println!("{}", dataset.path.display());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire(
        &self,
        index_url: &str,
        destination: &Path,
        target_dir: &Path,
    ) -> Result<DatasetDirectory, AcquireError> {
        let _lock = TargetLock::acquire(target_dir)?;

        let candidates = self.list_candidates(index_url).await?;
        let selected = self.select_latest(&candidates, index_url)?;

        if let Some(existing) = self.existing_dataset(&selected, target_dir).await {
            return Ok(existing);
        }

        let archive = self.fetch_archive(&selected, destination).await?;
        let _cleanup = ArchiveCleanup {
            path: archive.path.clone(),
            keep: self.config.keep_archive,
        };

        let dataset = extract_archive(&archive, target_dir, &self.config).await?;
        info!(
            "✅ Dataset {} ready at {} ({} files)",
            dataset.backup,
            dataset.path.display(),
            dataset.entries
        );
        Ok(dataset)
    }

    /// Runs the acquisition up to and including `stage`.
    pub async fn run(
        &self,
        stage: ExecutionStage,
        index_url: &str,
        destination: &Path,
        target_dir: &Path,
    ) -> Result<StageOutcome, AcquireError> {
        match stage {
            ExecutionStage::All => self
                .acquire(index_url, destination, target_dir)
                .await
                .map(StageOutcome::Extracted),
            ExecutionStage::ListOnly => {
                let candidates = self.list_candidates(index_url).await?;
                let latest = self.select_latest(&candidates, index_url)?;
                Ok(StageOutcome::Listed { candidates, latest })
            }
            ExecutionStage::DownloadOnly => {
                let candidates = self.list_candidates(index_url).await?;
                let selected = self.select_latest(&candidates, index_url)?;
                self.fetch_archive(&selected, destination)
                    .await
                    .map(StageOutcome::Downloaded)
            }
        }
    }

    /// The dataset already at `target_dir`, if it holds `selected` and
    /// re-downloading was not forced.
    async fn existing_dataset(
        &self,
        selected: &SelectedBackup,
        target_dir: &Path,
    ) -> Option<DatasetDirectory> {
        if self.config.force {
            return None;
        }
        let marker = read_marker(target_dir).await?;
        if marker.backup != selected.backup.name() {
            info!(
                "Existing dataset holds {}, replacing with {}",
                marker.backup, selected.backup
            );
            return None;
        }
        info!(
            "✅ {} already holds {}, skipping download",
            target_dir.display(),
            selected.backup
        );
        Some(DatasetDirectory {
            path: target_dir.to_path_buf(),
            backup: selected.backup,
            entries: marker.entries,
            reused: true,
        })
    }
}
