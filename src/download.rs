//! Archive download functionality.

use crate::error::AcquireError;
use crate::lock::parent_dir;
use crate::progress::download_bar;
use crate::retry::{is_transient_status, with_retry, Failure};
use crate::types::{AcquireConfig, ArchiveFile, SelectedBackup};
use futures_util::StreamExt;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG};
use reqwest::Client;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// What a successful attempt produced: the verified temporary file and
/// what was learned about the transfer.
struct Transfer {
    file: NamedTempFile,
    size: u64,
    content_type: Option<String>,
}

/// Downloads the archive of `selected` to `destination`.
///
/// Each attempt streams into its own `.<name>.XXXXXX.partial` file next to
/// `destination`, which is only renamed onto `destination` once the byte
/// count (and MD5, when the server's ETag is a plain MD5 digest) has been
/// verified. Temporary files are removed on drop, so they never survive a
/// failed or cancelled call and concurrent downloads to the same destination
/// never share one.
///
/// # Arguments
///
/// * `client` - Shared HTTP client
/// * `selected` - The backup to download
/// * `destination` - Final path of the archive
/// * `config` - Acquisition configuration
pub(crate) async fn fetch_archive(
    client: &Client,
    selected: &SelectedBackup,
    destination: &Path,
    config: &AcquireConfig,
) -> Result<ArchiveFile, AcquireError> {
    let url = selected.archive_url.as_str();
    info!("Downloading {} to {}", url, destination.display());

    let staging_dir = parent_dir(destination);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| AcquireError::download(url, e))?;
    let prefix = format!(
        ".{}.",
        destination
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive")
    );

    let pb = download_bar(config.show_progress);
    pb.set_message(selected.backup.name());

    let result = with_retry(&config.retry, "archive download", || {
        download_once(client, url, &staging_dir, &prefix, &pb)
    })
    .await;

    let transfer = match result {
        Ok(transfer) => transfer,
        Err(e) => {
            pb.abandon_with_message("❌ Download failed!");
            return Err(e);
        }
    };

    // Atomic rename; on failure the temporary file is dropped and removed.
    transfer.file.persist(destination).map_err(|e| {
        AcquireError::download(url, format!("cannot move archive into place: {}", e.error))
    })?;
    pb.finish_with_message(format!("✅ Downloaded {}", selected.backup.name()));
    info!(
        "Downloaded {} bytes to {}",
        transfer.size,
        destination.display()
    );

    Ok(ArchiveFile {
        backup: selected.backup,
        url: selected.archive_url.clone(),
        path: destination.to_path_buf(),
        size: transfer.size,
        content_type: transfer.content_type,
    })
}

async fn download_once(
    client: &Client,
    url: &str,
    staging_dir: &Path,
    prefix: &str,
    pb: &indicatif::ProgressBar,
) -> Result<Transfer, Failure> {
    let transient = |reason: String| Failure::Transient(AcquireError::download(url, reason));
    let permanent = |reason: String| Failure::Permanent(AcquireError::download(url, reason));

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transient(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let reason = format!("HTTP {}", status);
        return Err(if is_transient_status(status) {
            transient(reason)
        } else {
            permanent(reason)
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(ct) = &content_type {
        if ct.trim_start().to_ascii_lowercase().starts_with("text/") {
            return Err(permanent(format!(
                "server returned '{}' instead of an archive",
                ct
            )));
        }
    }

    let content_length = response.content_length();
    let expected_md5 = md5_etag(response.headers());

    let staging = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".partial")
        .tempfile_in(staging_dir)
        .map_err(|e| {
            permanent(format!(
                "cannot create temporary file in {}: {}",
                staging_dir.display(),
                e
            ))
        })?;
    let write_failed = |e: std::io::Error| {
        permanent(format!("write to {} failed: {}", staging.path().display(), e))
    };
    let handle = staging.as_file().try_clone().map_err(write_failed)?;
    let mut file = BufWriter::with_capacity(1024 * 1024, tokio::fs::File::from_std(handle));

    pb.set_length(content_length.unwrap_or(0));
    pb.set_position(0);

    // Stream download and compute MD5 simultaneously
    let mut byte_stream = response.bytes_stream();
    let mut hasher = expected_md5.as_ref().map(|_| Md5::new());
    let mut written: u64 = 0;

    while let Some(piece) = byte_stream.next().await {
        let chunk = piece.map_err(|e| transient(format!("transfer interrupted: {}", e)))?;

        if let Some(ref mut h) = hasher {
            h.update(&chunk);
        }

        file.write_all(&chunk).await.map_err(write_failed)?;
        written += chunk.len() as u64;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await.map_err(write_failed)?;
    file.into_inner().sync_all().await.map_err(write_failed)?;

    // Verify file size
    match content_length {
        Some(expected) if expected != written => {
            return Err(transient(format!(
                "truncated transfer: expected {} bytes, got {} bytes",
                expected, written
            )));
        }
        Some(_) => {}
        None => warn!(
            "Content-Length header was not present for {}. Cannot verify file size.",
            url
        ),
    }

    if let (Some(expected), Some(hasher)) = (expected_md5, hasher) {
        let computed = format!("{:x}", hasher.finalize());
        if computed != expected {
            return Err(transient(format!(
                "MD5 mismatch: expected {}, got {}",
                expected, computed
            )));
        }
        info!("✅ MD5 verified for {}", url);
    }

    Ok(Transfer {
        file: staging,
        size: written,
        content_type,
    })
}

/// Returns the ETag when it is a strong, plain MD5 digest.
///
/// S3/R2 use the object MD5 for single-part uploads. Weak tags, multipart
/// tags (`<md5>-<parts>`) and nginx's `<mtime>-<size>` tags are not digests.
fn md5_etag(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(ETAG)?.to_str().ok()?.trim();
    if raw.starts_with("W/") {
        return None;
    }
    let tag = raw.trim_matches('"');
    let is_digest = tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit());
    is_digest.then(|| tag.to_ascii_lowercase())
}
