//! Tar archive extraction logic.

use crate::error::AcquireError;
use crate::lock::{parent_dir, sibling_path};
use crate::progress::extract_spinner;
use crate::types::{AcquireConfig, ArchiveFile, DatasetDirectory, SnapshotMarker, MARKER_FILE};
use flate2::read::GzDecoder;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tar::Archive;
use tempfile::TempDir;
use tracing::{info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Signals the blocking extraction to stop when the owning future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Extracts `archive` into `target_dir`, replacing whatever was there.
///
/// The archive is unpacked into a hidden staging directory next to
/// `target_dir`. Only after every entry is written and the marker is in place
/// is the staging directory renamed onto `target_dir`. Any failure (or
/// dropping the returned future) removes the staging directory and leaves
/// `target_dir` as it was. The caller must hold the target lock.
pub(crate) async fn extract_archive(
    archive: &ArchiveFile,
    target_dir: &Path,
    config: &AcquireConfig,
) -> Result<DatasetDirectory, AcquireError> {
    let parent = parent_dir(target_dir);
    let name = target_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            AcquireError::extraction(target_dir, "target has no usable directory name")
        })?;

    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| AcquireError::extraction(target_dir, e))?;

    info!(
        "📂 Extracting {} into {}",
        archive.path.display(),
        target_dir.display()
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let _cancel_guard = CancelOnDrop(Arc::clone(&cancel));
    let pb = extract_spinner(config.show_progress);
    pb.set_message(format!("📂 Extracting {}", archive.backup.name()));

    let source = archive.clone();
    let target = target_dir.to_path_buf();
    let pb_inner = pb.clone();
    // Everything touching the filesystem runs on the blocking pool. The
    // staging directory is owned by the task so it is cleaned up even if this
    // future is dropped while the task is still running.
    let unpacked = tokio::task::spawn_blocking(move || {
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.staging-", name))
            .tempdir_in(&parent)
            .map_err(|e| {
                AcquireError::extraction(
                    &target,
                    format!("cannot create staging directory: {}", e),
                )
            })?;

        let entries = unpack_archive(&source.path, staging.path(), &cancel, &pb_inner)
            .map_err(|e| AcquireError::extraction(&target, e))?;

        let marker = SnapshotMarker {
            backup: source.backup.name(),
            source_url: source.url.clone(),
            archive_bytes: source.size,
            entries,
            extracted_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
        };
        write_marker(staging.path(), &marker)
            .map_err(|e| AcquireError::extraction(&target, e))?;

        if cancel.load(Ordering::Relaxed) {
            return Err(AcquireError::extraction(&target, "extraction interrupted"));
        }
        swap_into_place(staging, &target)?;
        Ok(entries)
    })
    .await
    .map_err(|e| AcquireError::extraction(target_dir, format!("extraction task failed: {}", e)))?;

    let entries = match unpacked {
        Ok(entries) => entries,
        Err(e) => {
            pb.abandon_with_message("❌ Extraction failed!");
            return Err(e);
        }
    };

    pb.finish_with_message(format!(
        "✅ Extracted {} files to {}",
        entries,
        target_dir.display()
    ));

    Ok(DatasetDirectory {
        path: target_dir.to_path_buf(),
        backup: archive.backup,
        entries,
        reused: false,
    })
}

/// Unpacks a gzip-compressed or plain tar archive into `dest`.
fn unpack_archive(
    archive_path: &Path,
    dest: &Path,
    cancel: &AtomicBool,
    pb: &indicatif::ProgressBar,
) -> io::Result<u64> {
    let mut file = std::fs::File::open(archive_path)?;
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);

    let mut file_count = 0u64;
    for entry in archive.entries()? {
        if cancel.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "extraction interrupted"));
        }

        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_safe_entry_path(&path) {
            return Err(unsafe_path(&path));
        }
        if !entry.unpack_in(dest)? {
            return Err(unsafe_path(&path));
        }

        file_count += 1;
        pb.set_position(file_count);
    }

    if file_count == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "archive contains no entries",
        ));
    }

    // tar stops at its end-of-archive blocks; read the rest so gzip checks
    // its trailer and a truncated or corrupt stream is still detected.
    io::copy(&mut archive.into_inner(), &mut io::sink())?;

    Ok(file_count)
}

/// Archive entries must stay inside the destination.
fn is_safe_entry_path(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn unsafe_path(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unsafe path in archive: {}", path.display()),
    )
}

fn write_marker(dir: &Path, marker: &SnapshotMarker) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(marker)?;
    std::fs::write(dir.join(MARKER_FILE), json)
}

/// Reads the marker of a previously completed dataset, if any.
pub(crate) async fn read_marker(target_dir: &Path) -> Option<SnapshotMarker> {
    let content = tokio::fs::read(target_dir.join(MARKER_FILE)).await.ok()?;
    match serde_json::from_slice(&content) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!(
                "Ignoring unreadable marker in {}: {}",
                target_dir.display(),
                e
            );
            None
        }
    }
}

/// Replaces `target_dir` with the fully populated `staging` directory.
///
/// An existing target is first moved aside and restored if the final rename
/// fails, so the target is never left half-populated.
fn swap_into_place(staging: TempDir, target_dir: &Path) -> Result<(), AcquireError> {
    let previous = sibling_path(target_dir, ".", ".previous")?;
    if previous.symlink_metadata().is_ok() {
        remove_path(&previous).map_err(|e| {
            AcquireError::extraction(
                target_dir,
                format!("cannot remove leftover {}: {}", previous.display(), e),
            )
        })?;
    }

    let had_target = target_dir.symlink_metadata().is_ok();
    if had_target {
        std::fs::rename(target_dir, &previous).map_err(|e| {
            AcquireError::extraction(
                target_dir,
                format!("cannot move existing dataset aside: {}", e),
            )
        })?;
    }

    if let Err(e) = std::fs::rename(staging.path(), target_dir) {
        if had_target {
            if let Err(restore) = std::fs::rename(&previous, target_dir) {
                warn!(
                    "Failed to restore previous dataset from {}: {}",
                    previous.display(),
                    restore
                );
            }
        }
        return Err(AcquireError::extraction(
            target_dir,
            format!("cannot move dataset into place: {}", e),
        ));
    }
    // The staging path no longer exists; keep the TempDir from touching it.
    let _ = staging.keep();

    if had_target {
        if let Err(e) = remove_path(&previous) {
            warn!("Failed to remove previous dataset {}: {}", previous.display(), e);
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
