//! Moving files into place across filesystems.
//!
//! Downloads are written to a staging directory that may sit on another
//! device than the destination, where `rename` fails with `EXDEV`. The mover
//! tries an ordered list of [`MoveTier`]s and stops at the first that works.
//! Copy tiers only delete the source after the destination's size matches
//! the source's original size, so an interruption leaves two copies, never
//! zero.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveTier {
    /// Atomic rename; same filesystem only.
    Rename,
    /// Whole-file copy, verify, delete source.
    Copy,
    /// Reader-to-writer stream copy, verify, delete source.
    StreamCopy,
}

pub const DEFAULT_TIERS: [MoveTier; 3] = [MoveTier::Rename, MoveTier::Copy, MoveTier::StreamCopy];

/// One tier's failure inside [`MoveError::Exhausted`].
#[derive(Debug, Clone, Serialize)]
pub struct TierFailure {
    pub tier: MoveTier,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum MoveError {
    #[error("source file {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("copy of {path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("could not move {} to {}: {}", from.display(), to.display(), describe(attempts))]
    Exhausted {
        from: PathBuf,
        to: PathBuf,
        attempts: Vec<TierFailure>,
    },
}

fn describe(attempts: &[TierFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{:?}: {}", a.tier, a.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Relocates files using a fixed order of strategies.
#[derive(Debug, Clone)]
pub struct Mover {
    tiers: Vec<MoveTier>,
}

impl Default for Mover {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_TIERS.to_vec(),
        }
    }
}

impl Mover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use only `tiers`, in order.
    pub fn with_tiers(tiers: impl Into<Vec<MoveTier>>) -> Self {
        Self {
            tiers: tiers.into(),
        }
    }

    /// Move `from` to `to`, returning the tier that succeeded.
    ///
    /// Moving a file onto itself succeeds without touching it. On failure the
    /// source is still in place.
    pub async fn move_into_place(&self, from: &Path, to: &Path) -> Result<MoveTier, MoveError> {
        let expected = match tokio::fs::metadata(from).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(MoveError::SourceMissing(from.to_path_buf())),
        };
        if from == to {
            return Ok(MoveTier::Rename);
        }
        if let Some(parent) = to.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            debug!(dir = %parent.display(), error = %e, "could not create destination parent");
        }

        let mut attempts = Vec::with_capacity(self.tiers.len());
        for &tier in &self.tiers {
            match attempt(tier, from, to, expected).await {
                Ok(()) => {
                    debug!(from = %from.display(), to = %to.display(), ?tier, "moved file");
                    return Ok(tier);
                }
                Err(e) => {
                    debug!(?tier, error = %e, "move tier failed");
                    attempts.push(TierFailure {
                        tier,
                        message: e.to_string(),
                    });
                }
            }
        }

        let err = MoveError::Exhausted {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            attempts,
        };
        warn!(error = %err, "all move strategies failed, source left in place");
        Err(err)
    }
}

async fn attempt(tier: MoveTier, from: &Path, to: &Path, expected: u64) -> Result<(), MoveError> {
    match tier {
        MoveTier::Rename => {
            tokio::fs::rename(from, to).await?;
            Ok(())
        }
        MoveTier::Copy => {
            tokio::fs::copy(from, to).await?;
            finish_verified(from, to, expected).await
        }
        MoveTier::StreamCopy => {
            stream_copy(from, to).await?;
            finish_verified(from, to, expected).await
        }
    }
}

async fn stream_copy(from: &Path, to: &Path) -> io::Result<u64> {
    let mut reader = tokio::fs::File::open(from).await?;
    let mut writer = tokio::fs::File::create(to).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    writer.sync_all().await?;
    Ok(copied)
}

/// Delete `from` only once `to` holds exactly `expected` bytes.
///
/// A short copy is removed so the next tier starts clean; the source is never
/// touched on mismatch.
pub(crate) async fn finish_verified(from: &Path, to: &Path, expected: u64) -> Result<(), MoveError> {
    let actual = tokio::fs::metadata(to).await?.len();
    if actual != expected {
        let _ = tokio::fs::remove_file(to).await;
        return Err(MoveError::SizeMismatch {
            path: to.to_path_buf(),
            expected,
            actual,
        });
    }
    tokio::fs::remove_file(from).await?;
    Ok(())
}
