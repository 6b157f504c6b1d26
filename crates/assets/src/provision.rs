//! Destination directory provisioning.

use crate::guard::PathGuard;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

static PROBE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("refusing to create a directory at protected location {0}")]
    Dangerous(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("directory {path} exists but is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Create `path` if needed and prove it accepts writes.
///
/// Idempotent. The write test creates and removes a small probe file, so a
/// directory that exists but rejects writes fails here rather than halfway
/// through a batch.
pub async fn ensure_directory(path: &Path, guard: &PathGuard) -> Result<(), ProvisionError> {
    if guard.is_dangerous(path) {
        return Err(ProvisionError::Dangerous(path.to_path_buf()));
    }

    if let Ok(meta) = tokio::fs::metadata(path).await
        && !meta.is_dir()
    {
        return Err(ProvisionError::NotADirectory(path.to_path_buf()));
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(path)
        .await
        .map_err(|source| ProvisionError::Create {
            path: path.to_path_buf(),
            source,
        })?;

    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| ProvisionError::Create {
            path: path.to_path_buf(),
            source,
        })?;
    if !meta.is_dir() {
        return Err(ProvisionError::NotADirectory(path.to_path_buf()));
    }

    let probe = path.join(format!(
        ".fmcp-write-test-{}-{}",
        std::process::id(),
        PROBE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    write_probe(path, &probe).await?;

    debug!(dir = %path.display(), "destination directory ready");
    Ok(())
}

async fn write_probe(dir: &Path, probe: &Path) -> Result<(), ProvisionError> {
    let not_writable = |source| ProvisionError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::write(probe, b"fmcp").await.map_err(not_writable)?;
    tokio::fs::remove_file(probe).await.map_err(not_writable)
}

#[cfg(test)]
mod tests {
    use super::{ProvisionError, ensure_directory, write_probe};
    use crate::guard::{PathGuard, Platform, fixture_guard};

    fn guard() -> PathGuard {
        fixture_guard()
    }

    #[tokio::test]
    async fn creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b").join("c");
        ensure_directory(&dir, &guard()).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0, "probe must be removed");
    }

    #[tokio::test]
    async fn is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("assets");
        ensure_directory(&dir, &guard()).await.unwrap();
        ensure_directory(&dir, &guard()).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn rejects_dangerous_paths_without_io() {
        let linux = PathGuard::for_platform(Platform::Linux);
        for dir in ["/usr/share/fmcp-never", "/var/lib/fmcp-never", "/tmp/fmcp-never"] {
            let err = ensure_directory(dir.as_ref(), &linux).await.unwrap_err();
            assert!(matches!(err, ProvisionError::Dangerous(_)), "{dir}");
            assert!(!std::path::Path::new(dir).exists());
        }
    }

    #[tokio::test]
    async fn failed_probe_write_is_not_writable() {
        let tmp = tempfile::tempdir().unwrap();
        let blocked = tmp.path().join("probe");
        std::fs::create_dir(&blocked).unwrap();
        let err = write_probe(tmp.path(), &blocked).await.unwrap_err();
        match err {
            ProvisionError::NotWritable { path, .. } => assert_eq!(path, tmp.path()),
            other => panic!("expected NotWritable, got {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_directory_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("locked");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        // Permission bits do not bind a privileged user.
        let privileged = std::fs::write(dir.join("check"), "x").is_ok();
        if !privileged {
            let err = ensure_directory(&dir, &guard()).await.unwrap_err();
            assert!(matches!(err, ProvisionError::NotWritable { .. }), "{err}");
        }
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn file_in_the_way_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("taken");
        std::fs::write(&file, "x").unwrap();
        let err = ensure_directory(&file, &guard()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotADirectory(_)));
    }
}
