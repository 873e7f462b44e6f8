//! Exclusive advisory lock on a target directory.

use crate::error::AcquireError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for as long as a target directory is being replaced.
///
/// The lock lives on a sibling `<target>.lock` file because the target
/// itself is renamed during the swap. `flock` is released by the kernel when
/// the process dies, so a crash never leaves a stale lock behind.
pub(crate) struct TargetLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl TargetLock {
    /// Takes the lock without blocking.
    pub(crate) fn acquire(target: &Path) -> Result<Self, AcquireError> {
        let path = sibling_path(target, "", ".lock")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AcquireError::extraction(target, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                AcquireError::extraction(target, format!("cannot open {}: {}", path.display(), e))
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!("Locked {}", path.display());
                Ok(Self {
                    _flock: flock,
                    path,
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                Err(AcquireError::TargetLocked(target.to_path_buf()))
            }
            Err((_, errno)) => Err(AcquireError::extraction(
                target,
                format!("cannot lock {}: {}", path.display(), errno),
            )),
        }
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        debug!("Unlocked {}", self.path.display());
    }
}

/// Builds `<parent>/<prefix><name><suffix>` next to `target`.
pub(crate) fn sibling_path(
    target: &Path,
    prefix: &str,
    suffix: &str,
) -> Result<PathBuf, AcquireError> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AcquireError::extraction(target, "target has no usable directory name"))?;
    Ok(parent_dir(target).join(format!("{}{}{}", prefix, name, suffix)))
}

/// Parent of `target`, with `.` standing in for a bare relative name.
pub(crate) fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("output-directory");

        let first = TargetLock::acquire(&target).unwrap();
        let second = TargetLock::acquire(&target);
        assert!(matches!(second, Err(AcquireError::TargetLocked(_))));

        drop(first);
        assert!(TargetLock::acquire(&target).is_ok());
    }

    #[test]
    fn test_lock_file_is_a_sibling() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("data");
        let _lock = TargetLock::acquire(&target).unwrap();

        assert!(temp_dir.path().join("data.lock").exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_sibling_path_for_relative_target() {
        let p = sibling_path(Path::new("data"), ".", ".previous").unwrap();
        assert_eq!(p, PathBuf::from("./.data.previous"));
        assert!(sibling_path(Path::new("/"), "", ".lock").is_err());
    }
}
