//! Destination path resolution.
//!
//! Turns whatever the caller passed as `local_path` into an absolute
//! directory that is guaranteed not to be a system root or a dangerous
//! system location.

use crate::guard::PathGuard;
use crate::workspace::{WorkspaceCandidate, WorkspaceLocator};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory used when the caller passes an empty path.
pub const DEFAULT_ASSET_DIR: &str = "figma-assets";

/// Last-resort destination under home when a resolved path is unsafe.
pub const EMERGENCY_DIR: &str = "figma-mcp-assets";

#[derive(Error, Debug)]
pub enum PathError {
    /// Even the emergency location is classified dangerous, so the home
    /// directory itself must be misconfigured.
    #[error("refusing to resolve {0}: home directory is a protected system location")]
    UnsafeConfiguration(PathBuf),
}

/// A caller-supplied destination and where it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub original: String,
    pub resolved: PathBuf,
}

/// Resolves destination paths against the detected workspace.
#[derive(Debug, Clone)]
pub struct PathResolver {
    locator: WorkspaceLocator,
}

impl PathResolver {
    pub fn new(locator: WorkspaceLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &WorkspaceLocator {
        &self.locator
    }

    pub fn guard(&self) -> &PathGuard {
        self.locator.guard()
    }

    /// Resolve against a freshly located workspace.
    pub fn resolve(&self, user_path: &str) -> Result<ResolvedPath, PathError> {
        self.resolve_in(user_path, None)
    }

    /// Resolve against `workspace` when given, detecting one otherwise.
    pub fn resolve_in(
        &self,
        user_path: &str,
        workspace: Option<&WorkspaceCandidate>,
    ) -> Result<ResolvedPath, PathError> {
        let guard = self.guard();
        let cleaned = strip_invisible(user_path);
        let candidate = Path::new(&cleaned);

        if candidate.is_absolute() && self.is_trusted_absolute(candidate) {
            let resolved = lexical_normalize(candidate);
            debug!(original = user_path, resolved = %resolved.display(), "using absolute path");
            return Ok(ResolvedPath {
                original: user_path.to_string(),
                resolved,
            });
        }

        let located;
        let workspace = match workspace {
            Some(ws) => ws,
            None => {
                located = self.locator.locate();
                &located
            }
        };
        let mut base = workspace.directory.clone();
        if guard.is_dangerous(&base) || guard.is_system_root(&base) {
            warn!(workspace = %base.display(), "workspace is unsafe, using home fallback");
            base = self.locator.fallback_workspace();
        }

        let relative = relative_part(&cleaned);
        let resolved = lexical_normalize(&base.join(relative));

        let parent_is_root = resolved.parent().is_none_or(|p| guard.is_system_root(p));
        if guard.is_dangerous(&resolved) || parent_is_root {
            let emergency = self.locator.env().home_or_temp().join(EMERGENCY_DIR);
            warn!(
                original = user_path,
                rejected = %resolved.display(),
                emergency = %emergency.display(),
                "resolved path is unsafe, using emergency location"
            );
            if guard.is_dangerous(&emergency) {
                return Err(PathError::UnsafeConfiguration(emergency));
            }
            return Ok(ResolvedPath {
                original: user_path.to_string(),
                resolved: emergency,
            });
        }

        debug!(original = user_path, resolved = %resolved.display(), "resolved path");
        Ok(ResolvedPath {
            original: user_path.to_string(),
            resolved,
        })
    }

    fn is_trusted_absolute(&self, path: &Path) -> bool {
        let guard = self.guard();
        let path = lexical_normalize(path);
        !guard.is_system_root(&path)
            && !guard.is_dangerous(&path)
            && path.parent().is_some_and(|p| !guard.is_system_root(p))
    }
}

/// Drop control characters and invisible formatting marks that some hosts
/// leak into arguments (BOMs, zero-width spaces).
pub fn strip_invisible(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '\u{200b}'..='\u{200f}' | '\u{2060}' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// The caller path as a workspace-relative path: no leading `./`, at most one
/// leading separator removed, empty mapped to [`DEFAULT_ASSET_DIR`].
fn relative_part(cleaned: &str) -> String {
    let mut rel = cleaned;
    while let Some(rest) = rel.strip_prefix("./").or_else(|| rel.strip_prefix(".\\")) {
        rel = rest;
    }
    let rel = rel
        .strip_prefix('/')
        .or_else(|| rel.strip_prefix('\\'))
        .unwrap_or(rel);
    let rel = strip_drive(rel);
    if rel.is_empty() || rel == "." {
        DEFAULT_ASSET_DIR.to_string()
    } else {
        rel.to_string()
    }
}

/// `C:\foo` must not re-root the join on Windows.
fn strip_drive(rel: &str) -> &str {
    let bytes = rel.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        rel[2..].trim_start_matches(['/', '\\'])
    } else {
        rel
    }
}

/// Fold `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::ParentDir) | None => out.push(".."),
                _ => {}
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
