//! Post-batch verification and recovery of misplaced assets.
//!
//! Every result reported as successful is checked on disk. Files that are
//! missing at their expected path are searched for in a fixed list of likely
//! directories and then with a bounded walk; whatever is found is moved back
//! into place. Anything that cannot be found is downgraded to a failure, so a
//! batch never claims bytes that are not there.

use crate::download::DownloadResult;
use crate::env::Environment;
use crate::guard::PathGuard;
use crate::mover::Mover;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Deepest level the recovery walk descends below each root.
pub const MAX_SEARCH_DEPTH: usize = 4;

/// Entries visited across all walk roots before the search gives up.
pub const MAX_VISITED_ENTRIES: usize = 20_000;

/// Directory names never descended into. Hidden directories are skipped too.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "out",
    "__pycache__",
    "venv",
    "Library",
    "AppData",
    "Applications",
    "Pods",
];

#[derive(Debug, Clone, Serialize)]
pub struct VerificationRecord {
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every file was where it was reported.
    Reconciled,
    /// Some files were relocated and none are missing.
    Recovered,
    /// At least one file could not be verified or recovered.
    PartialFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryFailure {
    pub node_id: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub checked: usize,
    pub in_place: usize,
    pub recovered: usize,
    pub failed: usize,
    pub records: Vec<VerificationRecord>,
    pub failures: Vec<RecoveryFailure>,
    pub outcome: BatchOutcome,
}

/// Where to look for files that did not land at their expected path.
#[derive(Debug, Clone, Default)]
pub struct SearchLocations {
    /// Checked for the file name or relative path, without descending.
    direct: Vec<PathBuf>,
    /// Walked up to [`MAX_SEARCH_DEPTH`].
    walk_roots: Vec<PathBuf>,
}

impl SearchLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direct(mut self, dir: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.direct, dir.into());
        self
    }

    pub fn with_walk_root(mut self, dir: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.walk_roots, dir.into());
        self
    }

    /// The usual places a misrouted write ends up.
    ///
    /// System roots and protected directories are never walked.
    pub fn from_environment(
        env: &Environment,
        guard: &PathGuard,
        workspace: Option<&Path>,
        staging: Option<&Path>,
    ) -> Self {
        let mut locations = Self::new();
        let home = env.home().cloned();

        let direct = staging
            .map(Path::to_path_buf)
            .into_iter()
            .chain(workspace.map(Path::to_path_buf))
            .chain(env.cwd().cloned())
            .chain(env.var("PWD").map(PathBuf::from))
            .chain(env.var("INIT_CWD").map(PathBuf::from))
            .chain(home.clone())
            .chain(
                ["Downloads", "Desktop", "Documents"]
                    .into_iter()
                    .filter_map(|d| home.as_ref().map(|h| h.join(d))),
            );
        for dir in direct {
            locations = locations.with_direct(dir);
        }

        let walk = workspace
            .map(Path::to_path_buf)
            .into_iter()
            .chain(env.cwd().cloned())
            .chain(home)
            .filter(|d| !guard.is_system_root(d) && !guard.is_dangerous(d));
        for dir in walk {
            locations = locations.with_walk_root(dir);
        }
        locations
    }

    pub fn direct(&self) -> &[PathBuf] {
        &self.direct
    }

    pub fn walk_roots(&self) -> &[PathBuf] {
        &self.walk_roots
    }
}

fn push_unique(list: &mut Vec<PathBuf>, dir: PathBuf) {
    if !list.contains(&dir) {
        list.push(dir);
    }
}

pub struct RecoveryEngine {
    search: SearchLocations,
    mover: Mover,
}

impl RecoveryEngine {
    pub fn new(search: SearchLocations) -> Self {
        Self {
            search,
            mover: Mover::new(),
        }
    }

    pub fn with_mover(mut self, mover: Mover) -> Self {
        self.mover = mover;
        self
    }

    pub fn search(&self) -> &SearchLocations {
        &self.search
    }

    /// Check every successful result against the disk and repair what can
    /// be repaired. Results that stay missing are marked failed in place.
    pub async fn verify_and_recover(
        &self,
        results: &mut [DownloadResult],
        dest_dir: &Path,
    ) -> RecoveryReport {
        let mut report = RecoveryReport {
            checked: 0,
            in_place: 0,
            recovered: 0,
            failed: 0,
            records: Vec::new(),
            failures: Vec::new(),
            outcome: BatchOutcome::Reconciled,
        };

        for result in results.iter_mut().filter(|r| r.success) {
            report.checked += 1;
            let expected = result.file_path.clone();
            let relative_path = expected.strip_prefix(dest_dir).ok().map(Path::to_path_buf);
            let size = non_empty_file_len(&expected).await;
            report.records.push(VerificationRecord {
                path: expected.clone(),
                exists: size.is_some(),
                size,
                relative_path: relative_path.clone(),
            });
            if size.is_some() {
                report.in_place += 1;
                continue;
            }

            debug!(node = %result.node_id, path = %expected.display(), "file missing after download");
            let reason = match self.find_stray(&expected, relative_path.as_deref()).await {
                Some(found) => match self.mover.move_into_place(&found, &expected).await {
                    Ok(tier) => {
                        info!(
                            node = %result.node_id,
                            from = %found.display(),
                            to = %expected.display(),
                            ?tier,
                            "recovered misplaced asset"
                        );
                        report.recovered += 1;
                        continue;
                    }
                    Err(e) => format!("found at {} but could not move it: {e}", found.display()),
                },
                None => "file not found at the expected path or any search location".to_string(),
            };

            warn!(node = %result.node_id, path = %expected.display(), %reason, "asset not recovered");
            result.success = false;
            result.error = Some(reason.clone());
            report.failed += 1;
            report.failures.push(RecoveryFailure {
                node_id: result.node_id.clone(),
                path: expected,
                reason,
            });
        }

        report.outcome = if report.failed > 0 {
            BatchOutcome::PartialFailure
        } else if report.recovered > 0 {
            BatchOutcome::Recovered
        } else {
            BatchOutcome::Reconciled
        };
        report
    }

    async fn find_stray(&self, expected: &Path, relative: Option<&Path>) -> Option<PathBuf> {
        let file_name = expected.file_name()?.to_os_string();

        for dir in &self.search.direct {
            let candidates = relative
                .map(|r| dir.join(r))
                .into_iter()
                .chain(std::iter::once(dir.join(&file_name)));
            for candidate in candidates {
                if candidate != expected && non_empty_file_len(&candidate).await.is_some() {
                    return Some(candidate);
                }
            }
        }

        let roots = self.search.walk_roots.clone();
        let expected = expected.to_path_buf();
        tokio::task::spawn_blocking(move || walk_for(&roots, &file_name, &expected))
            .await
            .ok()
            .flatten()
    }
}

async fn non_empty_file_len(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() || entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
}

fn walk_for(roots: &[PathBuf], file_name: &OsString, expected: &Path) -> Option<PathBuf> {
    let mut visited = 0usize;
    for root in roots {
        let walker = WalkDir::new(root)
            .max_depth(MAX_SEARCH_DEPTH)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));
        for entry in walker.filter_map(Result::ok) {
            visited += 1;
            if visited > MAX_VISITED_ENTRIES {
                debug!(limit = MAX_VISITED_ENTRIES, "recovery search limit reached");
                return None;
            }
            if entry.file_type().is_file()
                && entry.file_name() == file_name.as_os_str()
                && entry.path() != expected
                && entry.metadata().is_ok_and(|m| m.len() > 0)
            {
                return Some(entry.into_path());
            }
        }
    }
    None
}
