//! Workspace detection.
//!
//! Hosts launching an MCP server rarely agree on how they report the user's
//! project: some set IDE-specific variables, some only `PWD`, and a few start
//! the server with `/` as its working directory. The locator collects
//! candidates from an ordered list of [`EnvProvider`]s, a marker-file search
//! and the process working directory, validates each one, and picks the
//! highest-confidence survivor. When nothing validates it falls back to a
//! directory under the user's home.

use crate::env::Environment;
use crate::guard::PathGuard;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory under home used when no workspace can be detected.
pub const FALLBACK_WORKSPACE_DIR: &str = "figma-mcp-workspace";

/// Marker file written into the fallback workspace so later runs score it.
pub const FALLBACK_MARKER_FILE: &str = "package.json";

/// Ordered best-first, so sorting candidates ascending puts the winner first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A directory the workspace could be, with where the guess came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceCandidate {
    pub directory: PathBuf,
    pub confidence: Confidence,
    pub source: String,
}

/// An environment variable consulted for workspace paths.
#[derive(Debug, Clone)]
pub struct EnvProvider {
    pub name: &'static str,
    pub variable: &'static str,
    pub confidence: Confidence,
    /// Value may hold several `;`-separated paths.
    pub multi_valued: bool,
}

impl EnvProvider {
    pub const fn new(name: &'static str, variable: &'static str, confidence: Confidence) -> Self {
        Self {
            name,
            variable,
            confidence,
            multi_valued: false,
        }
    }

    pub const fn multi(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    /// Paths this provider yields in `env`, in order.
    pub fn paths(&self, env: &Environment) -> Vec<PathBuf> {
        let Some(value) = env.var(self.variable) else {
            return Vec::new();
        };
        if self.multi_valued {
            value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        } else {
            vec![PathBuf::from(value)]
        }
    }
}

/// Providers in priority order, highest first.
pub fn default_providers() -> Vec<EnvProvider> {
    vec![
        EnvProvider::new("IDE workspace folders", "WORKSPACE_FOLDER_PATHS", Confidence::High).multi(),
        EnvProvider::new("VS Code workspace", "VSCODE_WORKSPACE_FOLDER", Confidence::High).multi(),
        EnvProvider::new("project root", "PROJECT_ROOT", Confidence::High),
        EnvProvider::new("workspace root", "WORKSPACE_ROOT", Confidence::High),
        EnvProvider::new("npm prefix", "npm_config_prefix", Confidence::High),
        EnvProvider::new("npm initial directory", "INIT_CWD", Confidence::High),
        EnvProvider::new("shell working directory", "PWD", Confidence::Medium),
        EnvProvider::new("previous working directory", "OLDPWD", Confidence::Medium),
    ]
}

/// Weights and thresholds for the "looks like a project" heuristic.
#[derive(Debug, Clone)]
pub struct MarkerPolicy {
    /// Entry name and the score it adds when present.
    pub weights: Vec<(&'static str, u32)>,
    /// Minimum total score for a directory to count as a project.
    pub threshold: u32,
    /// How many parent levels the marker search walks up from each root.
    pub max_ancestor_levels: usize,
    /// Directories under home that seed the marker search.
    pub home_search_dirs: Vec<&'static str>,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self {
            weights: vec![
                ("package.json", 3),
                (".git", 3),
                ("Cargo.toml", 3),
                ("pyproject.toml", 3),
                ("go.mod", 3),
                ("package-lock.json", 2),
                ("yarn.lock", 2),
                ("pnpm-lock.yaml", 2),
                ("tsconfig.json", 2),
                ("src", 1),
                ("node_modules", 1),
                (".vscode", 1),
                (".cursor", 1),
                (".gitignore", 1),
                ("README.md", 1),
            ],
            threshold: 3,
            max_ancestor_levels: 3,
            home_search_dirs: vec!["Desktop", "Documents", "Projects", "Development", "Code"],
        }
    }
}

impl MarkerPolicy {
    pub fn score(&self, dir: &Path) -> u32 {
        self.weights
            .iter()
            .filter(|(marker, _)| dir.join(marker).exists())
            .map(|(_, weight)| weight)
            .sum()
    }

    pub fn looks_like_project(&self, dir: &Path) -> bool {
        self.score(dir) >= self.threshold
    }
}

/// Picks the directory downloads should be resolved against.
#[derive(Debug, Clone)]
pub struct WorkspaceLocator {
    env: Environment,
    providers: Vec<EnvProvider>,
    policy: MarkerPolicy,
    guard: PathGuard,
}

struct Collector<'a> {
    locator: &'a WorkspaceLocator,
    seen: HashSet<PathBuf>,
    found: Vec<WorkspaceCandidate>,
}

impl Collector<'_> {
    fn offer(&mut self, dir: &Path, confidence: Confidence, source: String) {
        if !dir.is_absolute() || !self.locator.is_valid(dir) {
            debug!(dir = %dir.display(), %source, "rejected workspace candidate");
            return;
        }
        if self.seen.insert(dir.to_path_buf()) {
            debug!(dir = %dir.display(), ?confidence, %source, "workspace candidate");
            self.found.push(WorkspaceCandidate {
                directory: dir.to_path_buf(),
                confidence,
                source,
            });
        }
    }
}

impl WorkspaceLocator {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            providers: default_providers(),
            policy: MarkerPolicy::default(),
            guard: PathGuard::current(),
        }
    }

    pub fn with_providers(mut self, providers: Vec<EnvProvider>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_policy(mut self, policy: MarkerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_guard(mut self, guard: PathGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn policy(&self) -> &MarkerPolicy {
        &self.policy
    }

    /// `~/figma-mcp-workspace`, or the same under the temp dir without a home.
    pub fn fallback_workspace(&self) -> PathBuf {
        self.env.home_or_temp().join(FALLBACK_WORKSPACE_DIR)
    }

    /// Select the workspace: the best validated candidate, else the fallback.
    pub fn locate(&self) -> WorkspaceCandidate {
        if let Some(best) = self.candidates().into_iter().next() {
            info!(
                workspace = %best.directory.display(),
                confidence = ?best.confidence,
                source = %best.source,
                "workspace located"
            );
            return best;
        }
        let directory = self.fallback_workspace();
        if self.guard.is_dangerous(&directory) {
            warn!(dir = %directory.display(), "fallback workspace is a protected location, not creating it");
        } else if let Err(e) = ensure_fallback_workspace(&directory) {
            warn!(dir = %directory.display(), error = %e, "could not prepare fallback workspace");
        }
        info!(workspace = %directory.display(), "no workspace detected, using home fallback");
        WorkspaceCandidate {
            directory,
            confidence: Confidence::Low,
            source: "home fallback".into(),
        }
    }

    /// All validated candidates, best first; earlier discoveries win ties.
    pub fn candidates(&self) -> Vec<WorkspaceCandidate> {
        let mut collector = Collector {
            locator: self,
            seen: HashSet::new(),
            found: Vec::new(),
        };

        for provider in &self.providers {
            for path in provider.paths(&self.env) {
                collector.offer(
                    &path,
                    provider.confidence,
                    format!("{} (${})", provider.name, provider.variable),
                );
            }
        }

        for root in self.marker_search_roots() {
            self.search_markers(&root, &mut collector);
        }

        if let Some(cwd) = self.env.cwd()
            && !self.guard.is_system_root(cwd)
            && self.policy.looks_like_project(cwd)
        {
            collector.offer(cwd, Confidence::Low, "process working directory".into());
        }

        let mut found = collector.found;
        found.sort_by_key(|c| c.confidence);
        found
    }

    /// Exists, is a directory, is not a system root and is not dangerous.
    pub fn is_valid(&self, dir: &Path) -> bool {
        dir.is_dir() && !self.guard.is_system_root(dir) && !self.guard.is_dangerous(dir)
    }

    fn marker_search_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .providers
            .iter()
            .flat_map(|p| p.paths(&self.env))
            .filter(|p| {
                p.is_absolute() && !self.guard.is_system_root(p) && !self.guard.is_dangerous(p)
            })
            .collect();
        if let Some(home) = self.env.home() {
            roots.push(home.clone());
            roots.extend(self.policy.home_search_dirs.iter().map(|d| home.join(d)));
        }
        roots
    }

    fn search_markers(&self, root: &Path, collector: &mut Collector<'_>) {
        for dir in root.ancestors().take(self.policy.max_ancestor_levels + 1) {
            self.offer_if_project(dir, collector);
        }

        let Ok(entries) = fs::read_dir(root) else {
            return;
        };
        let mut subdirs: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .collect();
        subdirs.sort();
        for dir in subdirs {
            self.offer_if_project(&dir, collector);
        }
    }

    fn offer_if_project(&self, dir: &Path, collector: &mut Collector<'_>) {
        if collector.seen.contains(dir) || self.guard.is_system_root(dir) {
            return;
        }
        let score = self.policy.score(dir);
        if score >= self.policy.threshold {
            collector.offer(
                dir,
                Confidence::Medium,
                format!("project markers (score {score})"),
            );
        }
    }
}

/// Create the fallback workspace and its marker file if missing.
pub fn ensure_fallback_workspace(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(FALLBACK_MARKER_FILE);
    if !marker.exists() {
        let manifest = serde_json::json!({
            "name": FALLBACK_WORKSPACE_DIR,
            "private": true,
            "description": "Workspace for assets downloaded from Figma",
            "created": chrono::Utc::now().to_rfc3339(),
        });
        let body = serde_json::to_string_pretty(&manifest).map_err(std::io::Error::other)?;
        fs::write(&marker, body)?;
    }
    Ok(())
}
