//! Download batches: resolve, provision, fetch, name, move, verify.

use crate::mover::Mover;
use crate::naming::{ExportSpec, FilenameAllocator};
use crate::provision::{ProvisionError, ensure_directory};
use crate::recovery::{RecoveryEngine, RecoveryReport, SearchLocations};
use crate::resolve::{PathError, PathResolver, lexical_normalize, strip_invisible};
use crate::source::AssetSource;
use crate::workspace::{Confidence, WorkspaceCandidate};
use fmcp_api::{ConstraintKind, FigmaError, ImageFormat, Node, normalize_node_id, validate_file_key};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Node ids per image URL request.
pub const IMAGE_BATCH_SIZE: usize = 10;

/// Pause between image URL requests, to stay under Figma's rate limit.
pub const BATCH_DELAY: Duration = Duration::from_millis(200);

/// Byte downloads in flight within one URL batch.
pub const DOWNLOAD_CONCURRENCY: usize = 4;

pub const MIN_SCALE: f64 = 0.01;
pub const MAX_SCALE: f64 = 4.0;

static BATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("no node ids given")]
    EmptyNodeIds,

    #[error("scale must be between 0.01 and 4, got {0}")]
    InvalidScale(f64),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Api(#[from] FigmaError),

    #[error("failed to prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to list destination {path}: {source}")]
    ReadDestination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Rendering options for a direct download.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Defaults to 1.
    pub scale: Option<f64>,
    /// Defaults to PNG.
    pub format: Option<ImageFormat>,
}

/// Tunables for [`Downloader`].
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Bytes are written here first, then moved to the destination.
    pub staging_dir: PathBuf,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub concurrency: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join(format!("fmcp-staging-{}", std::process::id())),
            batch_size: IMAGE_BATCH_SIZE,
            batch_delay: BATCH_DELAY,
            concurrency: DOWNLOAD_CONCURRENCY,
        }
    }
}

/// One file to produce.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub node_id: String,
    pub node_name: String,
    pub spec: ExportSpec,
    /// Whether `spec` came from the node's own export settings.
    pub from_export_setting: bool,
    pub target_filename: String,
    pub write_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub node_id: String,
    pub node_name: String,
    pub file_path: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_setting: Option<ExportSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Export settings that could not be rendered. Export batches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
}

impl DownloadSummary {
    fn of(results: &[DownloadResult], skipped: Option<usize>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            skipped,
        }
    }
}

/// Where the batch actually went, and whether that differs from the request.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceEnforcement {
    pub final_location: PathBuf,
    /// The destination was redirected away from the literal request.
    pub moved: bool,
    pub workspace_source: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub downloaded: Vec<DownloadResult>,
    pub summary: DownloadSummary,
    pub workspace_enforcement: WorkspaceEnforcement,
    pub recovery: RecoveryReport,
}

/// Everything a batch needs once the destination is known to be safe.
struct Prepared {
    workspace: WorkspaceCandidate,
    destination: PathBuf,
    staging: PathBuf,
    enforcement: WorkspaceEnforcement,
    allocator: FilenameAllocator,
}

/// Runs download batches against an [`AssetSource`].
pub struct Downloader<S> {
    source: S,
    resolver: PathResolver,
    settings: DownloadSettings,
    mover: Mover,
}

impl<S: AssetSource> Downloader<S> {
    pub fn new(source: S, resolver: PathResolver) -> Self {
        Self {
            source,
            resolver,
            settings: DownloadSettings::default(),
            mover: Mover::new(),
        }
    }

    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_mover(mut self, mover: Mover) -> Self {
        self.mover = mover;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Render `node_ids` at one format and scale into `local_path`.
    pub async fn download_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        local_path: &str,
        options: DownloadOptions,
    ) -> Result<DownloadReport, DownloadError> {
        let ids = validate_request(file_key, node_ids)?;
        let scale = options.scale.unwrap_or(1.0);
        if !scale.is_finite() || !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
            return Err(DownloadError::InvalidScale(scale));
        }
        let spec = ExportSpec::new(options.format.unwrap_or(ImageFormat::Png), scale);
        let mut prepared = self.prepare(local_path).await?;

        debug!(phase = "fetching", nodes = ids.len(), "looking up node names");
        let nodes = match self.source.file_nodes(file_key, &ids).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "node lookup failed, naming files by node id");
                HashMap::new()
            }
        };

        let tasks: Vec<DownloadTask> = ids
            .iter()
            .map(|id| {
                let placeholder;
                let node = match nodes.get(id) {
                    Some(node) => node,
                    None => {
                        placeholder = Node {
                            id: id.clone(),
                            name: id.clone(),
                            ..Default::default()
                        };
                        &placeholder
                    }
                };
                self.task(&mut prepared, node, spec.clone(), false)
            })
            .collect();

        let results = self.run_tasks(file_key, &tasks, &prepared).await;
        Ok(self.finish(prepared, results, None).await)
    }

    /// Render every export setting found under `root_node_ids` into
    /// `local_path`.
    pub async fn download_images_with_export_settings(
        &self,
        file_key: &str,
        root_node_ids: &[String],
        local_path: &str,
    ) -> Result<DownloadReport, DownloadError> {
        let ids = validate_request(file_key, root_node_ids)?;
        let mut prepared = self.prepare(local_path).await?;

        debug!(phase = "fetching", roots = ids.len(), "loading node trees");
        let nodes = self.source.file_nodes(file_key, &ids).await?;

        let mut skipped = 0;
        let mut tasks = Vec::new();
        for id in &ids {
            let Some(root) = nodes.get(id) else {
                warn!(node = %id, "root node not found in file");
                skipped += 1;
                continue;
            };
            let mut exportable = Vec::new();
            collect_exportable(root, &mut exportable);
            for node in exportable {
                for setting in &node.export_settings {
                    let Some(format) = ImageFormat::parse(&setting.format) else {
                        warn!(node = %node.id, format = %setting.format, "unsupported export format");
                        skipped += 1;
                        continue;
                    };
                    let spec = ExportSpec::new(format, export_scale(node, setting.constraint))
                        .with_suffix(setting.suffix.clone());
                    tasks.push(self.task(&mut prepared, node, spec, true));
                }
            }
        }
        info!(tasks = tasks.len(), skipped, "export settings collected");

        let results = self.run_tasks(file_key, &tasks, &prepared).await;
        Ok(self.finish(prepared, results, Some(skipped)).await)
    }

    async fn prepare(&self, local_path: &str) -> Result<Prepared, DownloadError> {
        debug!(phase = "resolving_path", local_path, "resolving destination");
        let workspace = self.resolver.locator().locate();
        let resolved = self.resolver.resolve_in(local_path, Some(&workspace))?;
        let destination = resolved.resolved;

        debug!(phase = "provisioning_directory", dir = %destination.display());
        ensure_directory(&destination, self.resolver.guard()).await?;

        let staging = self.settings.staging_dir.join(format!(
            "batch-{}",
            BATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|source| DownloadError::Staging {
                path: staging.clone(),
                source,
            })?;

        let allocator = FilenameAllocator::seeded_from(&destination).map_err(|source| {
            DownloadError::ReadDestination {
                path: destination.clone(),
                source,
            }
        })?;

        let requested = PathBuf::from(strip_invisible(local_path));
        let literal = if requested.is_absolute() {
            lexical_normalize(&requested)
        } else {
            lexical_normalize(&workspace.directory.join(&requested))
        };
        let enforcement = WorkspaceEnforcement {
            final_location: destination.clone(),
            moved: literal != destination,
            workspace_source: workspace.source.clone(),
            confidence: workspace.confidence,
        };
        if enforcement.moved {
            info!(
                requested = local_path,
                destination = %destination.display(),
                "destination redirected to a safe location"
            );
        }

        Ok(Prepared {
            workspace,
            destination,
            staging,
            enforcement,
            allocator,
        })
    }

    fn task(
        &self,
        prepared: &mut Prepared,
        node: &Node,
        spec: ExportSpec,
        from_export_setting: bool,
    ) -> DownloadTask {
        let base = if node.name.trim().is_empty() {
            node.id.as_str()
        } else {
            node.name.as_str()
        };
        let target_filename = prepared.allocator.unique_name(node, base, &spec);
        debug!(phase = "deduplicating_name", node = %node.id, file = %target_filename);
        DownloadTask {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            write_path: prepared.staging.join(&target_filename),
            target_filename,
            spec,
            from_export_setting,
        }
    }

    /// Fetch every task, grouped by (format, scale) so each group needs one
    /// URL request per chunk. Results come back in task order.
    async fn run_tasks(
        &self,
        file_key: &str,
        tasks: &[DownloadTask],
        prepared: &Prepared,
    ) -> Vec<DownloadResult> {
        let mut groups: Vec<((ImageFormat, f64), Vec<usize>)> = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            let key = (task.spec.format, task.spec.scale);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(i),
                None => groups.push((key, vec![i])),
            }
        }

        let mut slots: Vec<Option<DownloadResult>> = tasks.iter().map(|_| None).collect();
        let mut first_request = true;
        for ((format, scale), members) in groups {
            for chunk in members.chunks(self.settings.batch_size.max(1)) {
                if !first_request && !self.settings.batch_delay.is_zero() {
                    tokio::time::sleep(self.settings.batch_delay).await;
                }
                first_request = false;

                let mut ids: Vec<String> = Vec::with_capacity(chunk.len());
                for &i in chunk {
                    if !ids.contains(&tasks[i].node_id) {
                        ids.push(tasks[i].node_id.clone());
                    }
                }
                debug!(phase = "fetching", %format, scale, nodes = ids.len(), "requesting image urls");
                let urls = self.source.image_urls(file_key, &ids, format, scale).await;
                if let Err(e) = &urls {
                    warn!(%format, scale, error = %e, "image url request failed");
                }

                let outcomes: Vec<(usize, DownloadResult)> = stream::iter(chunk.iter().copied().map(|i| {
                    let task = &tasks[i];
                    let url = match &urls {
                        Ok(map) => map
                            .get(&task.node_id)
                            .cloned()
                            .flatten()
                            .ok_or_else(|| "Figma returned no image for this node".to_string()),
                        Err(e) => Err(format!("image url request failed: {e}")),
                    };
                    async move { (i, self.fetch_one(task, url, &prepared.destination).await) }
                }))
                .buffered(self.settings.concurrency.max(1))
                .collect()
                .await;

                for (i, result) in outcomes {
                    slots[i] = Some(result);
                }
            }
        }
        slots.into_iter().flatten().collect()
    }

    async fn fetch_one(
        &self,
        task: &DownloadTask,
        url: Result<String, String>,
        destination: &Path,
    ) -> DownloadResult {
        let file_path = destination.join(&task.target_filename);
        let mut result = DownloadResult {
            node_id: task.node_id.clone(),
            node_name: task.node_name.clone(),
            file_path: file_path.clone(),
            success: false,
            error: None,
            export_setting: task.from_export_setting.then(|| task.spec.clone()),
        };

        if let Err(reason) = self.write_to_staging(task, url).await {
            warn!(node = %task.node_id, %reason, "download failed");
            result.error = Some(reason);
            return result;
        }

        debug!(phase = "moving", node = %task.node_id, to = %file_path.display());
        if let Err(e) = self.mover.move_into_place(&task.write_path, &file_path).await {
            warn!(node = %task.node_id, error = %e, "file left in staging for recovery");
        }
        result.success = true;
        result
    }

    async fn write_to_staging(
        &self,
        task: &DownloadTask,
        url: Result<String, String>,
    ) -> Result<(), String> {
        let url = url?;
        debug!(phase = "writing", node = %task.node_id, path = %task.write_path.display());
        let bytes = self
            .source
            .fetch_bytes(&url)
            .await
            .map_err(|e| format!("download failed: {e}"))?;
        if bytes.is_empty() {
            return Err("Figma returned an empty image".into());
        }
        tokio::fs::write(&task.write_path, &bytes)
            .await
            .map_err(|e| format!("failed to write {}: {e}", task.write_path.display()))
    }

    async fn finish(
        &self,
        prepared: Prepared,
        mut results: Vec<DownloadResult>,
        skipped: Option<usize>,
    ) -> DownloadReport {
        debug!(phase = "verifying", files = results.len());
        let locator = self.resolver.locator();
        let search = SearchLocations::from_environment(
            locator.env(),
            locator.guard(),
            Some(&prepared.workspace.directory),
            Some(&prepared.staging),
        );
        let recovery = RecoveryEngine::new(search)
            .with_mover(self.mover.clone())
            .verify_and_recover(&mut results, &prepared.destination)
            .await;

        // Both removals fail harmlessly while anything is left behind,
        // including another batch's directory under the shared root.
        if tokio::fs::remove_dir(&prepared.staging).await.is_ok() {
            let _ = tokio::fs::remove_dir(&self.settings.staging_dir).await;
        }

        let summary = DownloadSummary::of(&results, skipped);
        info!(
            destination = %prepared.destination.display(),
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            outcome = ?recovery.outcome,
            "download batch finished"
        );
        DownloadReport {
            downloaded: results,
            summary,
            workspace_enforcement: prepared.enforcement,
            recovery,
        }
    }
}

fn validate_request(file_key: &str, node_ids: &[String]) -> Result<Vec<String>, DownloadError> {
    validate_file_key(file_key)?;
    let mut ids = Vec::with_capacity(node_ids.len());
    for id in node_ids {
        let id = normalize_node_id(id.trim());
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(DownloadError::EmptyNodeIds);
    }
    Ok(ids)
}

/// Visible nodes carrying export settings, depth first.
fn collect_exportable<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    if !node.visible {
        return;
    }
    if !node.export_settings.is_empty() {
        out.push(node);
    }
    for child in &node.children {
        collect_exportable(child, out);
    }
}

/// Render scale for an export constraint. Width and height constraints are
/// converted using the node's bounding box.
fn export_scale(node: &Node, constraint: fmcp_api::Constraint) -> f64 {
    let dimension = node.absolute_bounding_box.map(|b| match constraint.kind {
        ConstraintKind::Width => b.width,
        ConstraintKind::Height => b.height,
        ConstraintKind::Scale => 1.0,
    });
    let scale = match (constraint.kind, dimension) {
        (ConstraintKind::Scale, _) => constraint.value,
        (_, Some(dim)) if dim > 0.0 => constraint.value / dim,
        _ => 1.0,
    };
    if scale.is_finite() && scale > 0.0 {
        scale.clamp(MIN_SCALE, MAX_SCALE)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::guard::fixture_guard;
    use crate::recovery::BatchOutcome;
    use crate::workspace::WorkspaceLocator;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        nodes: HashMap<String, Node>,
        unrendered: HashSet<String>,
        broken_downloads: HashSet<String>,
        url_requests: Mutex<Vec<(ImageFormat, f64, Vec<String>)>>,
    }

    impl FakeSource {
        fn with_node(mut self, node: Node) -> Self {
            self.nodes.insert(node.id.clone(), node);
            self
        }
    }

    impl AssetSource for FakeSource {
        async fn file_nodes(
            &self,
            _file_key: &str,
            node_ids: &[String],
        ) -> Result<HashMap<String, Node>, FigmaError> {
            Ok(node_ids
                .iter()
                .filter_map(|id| self.nodes.get(id).map(|n| (id.clone(), n.clone())))
                .collect())
        }

        async fn image_urls(
            &self,
            _file_key: &str,
            node_ids: &[String],
            format: ImageFormat,
            scale: f64,
        ) -> Result<HashMap<String, Option<String>>, FigmaError> {
            self.url_requests
                .lock()
                .unwrap()
                .push((format, scale, node_ids.to_vec()));
            Ok(node_ids
                .iter()
                .map(|id| {
                    let url = (!self.unrendered.contains(id))
                        .then(|| format!("https://render.test/{id}"));
                    (id.clone(), url)
                })
                .collect())
        }

        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FigmaError> {
            let id = url.trim_start_matches("https://render.test/");
            if self.broken_downloads.contains(id) {
                return Err(FigmaError::Status {
                    status: 500,
                    message: "render backend unavailable".into(),
                });
            }
            Ok(format!("image-bytes-{id}").into_bytes())
        }
    }

    fn node(id: &str, name: &str) -> Node {
        Node {
            id: id.into(),
            name: name.into(),
            visible: true,
            ..Default::default()
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        project: PathBuf,
        staging: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let project = tmp.path().join("project");
            fs::create_dir_all(&project).unwrap();
            fs::write(project.join("package.json"), "{}").unwrap();
            fs::create_dir_all(tmp.path().join("home")).unwrap();
            Self {
                project,
                staging: tmp.path().join("staging"),
                _tmp: tmp,
            }
        }

        fn downloader(&self, source: FakeSource) -> Downloader<FakeSource> {
            let env = Environment::empty()
                .with_home(self.project.parent().unwrap().join("home"))
                .with_var("PROJECT_ROOT", self.project.to_string_lossy());
            let locator = WorkspaceLocator::new(env).with_guard(fixture_guard());
            Downloader::new(source, PathResolver::new(locator)).with_settings(DownloadSettings {
                staging_dir: self.staging.clone(),
                batch_size: 2,
                batch_delay: Duration::ZERO,
                concurrency: 2,
            })
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn downloads_into_workspace_relative_path() {
        let fx = Fixture::new();
        let source = FakeSource::default()
            .with_node(node("1:1", "icon"))
            .with_node(node("1:2", "icon"));
        let report = fx
            .downloader(source)
            .download_images(
                "abc123",
                &ids(&["1:1", "1-2"]),
                "./assets",
                DownloadOptions {
                    scale: None,
                    format: Some(ImageFormat::Svg),
                },
            )
            .await
            .unwrap();

        let dest = fx.project.join("assets");
        assert_eq!(report.workspace_enforcement.final_location, dest);
        assert!(!report.workspace_enforcement.moved);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.summary.skipped, None);
        assert_eq!(report.downloaded[0].file_path, dest.join("icon-x1.svg"));
        assert_eq!(report.downloaded[1].file_path, dest.join("icon-x1-2.svg"));
        assert_eq!(
            fs::read_to_string(dest.join("icon-x1-2.svg")).unwrap(),
            "image-bytes-1:2"
        );
        assert_eq!(report.recovery.outcome, BatchOutcome::Reconciled);
        assert!(!fx.staging.exists(), "empty staging root must be removed");
    }

    #[tokio::test]
    async fn staging_root_shared_with_a_stray_file_is_kept() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.staging).unwrap();
        fs::write(fx.staging.join("other-batch.png"), "x").unwrap();
        fx.downloader(FakeSource::default().with_node(node("1:1", "icon")))
            .download_images("abc123", &ids(&["1:1"]), "assets", DownloadOptions::default())
            .await
            .unwrap();
        assert!(fx.staging.join("other-batch.png").exists());
        assert_eq!(fs::read_dir(&fx.staging).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let fx = Fixture::new();
        let mut source = FakeSource::default();
        for i in 1..=5 {
            source = source.with_node(node(&format!("1:{i}"), &format!("asset {i}")));
        }
        source.broken_downloads.insert("1:2".into());
        let report = fx
            .downloader(source)
            .download_images(
                "abc123",
                &ids(&["1:1", "1:2", "1:3", "1:4", "1:5"]),
                "assets",
                DownloadOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.successful, 4);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(
            report.summary.successful + report.summary.failed,
            report.summary.total
        );
        assert!(!report.downloaded[1].success);
        assert!(report.downloaded[1].error.as_deref().unwrap().contains("500"));
        assert!(!fx.project.join("assets").join("asset-2-x1.png").exists());
        assert!(fx.project.join("assets").join("asset-5-x1.png").exists());
    }

    #[tokio::test]
    async fn url_requests_are_chunked() {
        let fx = Fixture::new();
        let source = FakeSource::default();
        let downloader = fx.downloader(source);
        downloader
            .download_images(
                "abc123",
                &ids(&["1:1", "1:2", "1:3", "1:4", "1:5"]),
                "assets",
                DownloadOptions {
                    scale: Some(2.0),
                    format: None,
                },
            )
            .await
            .unwrap();
        let requests = downloader.source().url_requests.lock().unwrap();
        let sizes: Vec<usize> = requests.iter().map(|(_, _, ids)| ids.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(requests.iter().all(|(f, s, _)| *f == ImageFormat::Png && *s == 2.0));
    }

    #[tokio::test]
    async fn unrendered_nodes_are_failures() {
        let fx = Fixture::new();
        let mut source = FakeSource::default();
        source.unrendered.insert("9:9".into());
        let report = fx
            .downloader(source)
            .download_images("abc123", &ids(&["9:9"]), "assets", DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.recovery.checked, 0);
        assert_eq!(report.downloaded[0].node_name, "9:9");
    }

    #[tokio::test]
    async fn rejects_bad_requests_before_any_io() {
        let fx = Fixture::new();
        let downloader = fx.downloader(FakeSource::default());
        let err = downloader
            .download_images("abc123", &ids(&["  "]), "assets", DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::EmptyNodeIds));

        let err = downloader
            .download_images("not a key", &ids(&["1:1"]), "assets", DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Api(FigmaError::InvalidFileKey(_))));

        let err = downloader
            .download_images(
                "abc123",
                &ids(&["1:1"]),
                "assets",
                DownloadOptions {
                    scale: Some(9.0),
                    format: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidScale(_)));
        assert!(!fx.project.join("assets").exists());
    }

    #[tokio::test]
    async fn root_destination_is_redirected() {
        let fx = Fixture::new();
        let report = fx
            .downloader(FakeSource::default())
            .download_images("abc123", &ids(&["1:1"]), "/", DownloadOptions::default())
            .await
            .unwrap();
        let location = &report.workspace_enforcement.final_location;
        assert_ne!(location, Path::new("/"));
        assert!(report.workspace_enforcement.moved);
        assert!(location.starts_with(fx.project.parent().unwrap()));
        assert_eq!(report.summary.successful, 1);
    }

    #[tokio::test]
    async fn export_settings_drive_format_scale_and_suffix() {
        let fx = Fixture::new();
        let tree: Node = serde_json::from_value(serde_json::json!({
            "id": "10:1",
            "name": "Page",
            "type": "FRAME",
            "children": [
                {
                    "id": "10:2",
                    "name": "Logo",
                    "type": "COMPONENT",
                    "absoluteBoundingBox": { "x": 0, "y": 0, "width": 50, "height": 25 },
                    "exportSettings": [
                        { "suffix": "", "format": "PNG", "constraint": { "type": "SCALE", "value": 2 } },
                        { "suffix": "@wide", "format": "PNG", "constraint": { "type": "WIDTH", "value": 100 } },
                        { "suffix": "", "format": "SVG", "constraint": { "type": "SCALE", "value": 1 } },
                        { "suffix": "", "format": "WEBP", "constraint": { "type": "SCALE", "value": 1 } }
                    ]
                },
                {
                    "id": "10:3",
                    "name": "Hidden",
                    "visible": false,
                    "exportSettings": [
                        { "suffix": "", "format": "PNG", "constraint": { "type": "SCALE", "value": 1 } }
                    ]
                }
            ]
        }))
        .unwrap();
        let downloader = fx.downloader(FakeSource::default().with_node(tree));
        let report = downloader
            .download_images_with_export_settings("abc123", &ids(&["10:1", "10:404"]), "exports")
            .await
            .unwrap();

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.successful, 3);
        assert_eq!(report.summary.skipped, Some(2));
        let names: Vec<String> = report
            .downloaded
            .iter()
            .map(|r| r.file_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Logo-x2.png", "Logo@wide.png", "Logo-x1.svg"]);
        let setting = report.downloaded[1].export_setting.as_ref().unwrap();
        assert_eq!(setting.scale, 2.0);
        assert_eq!(setting.suffix.as_deref(), Some("@wide"));

        // Both PNG settings resolve to 2x and share one url request.
        let requests = downloader.source().url_requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].2, vec!["10:2".to_string()]);
    }

    #[test]
    fn export_scale_conversions() {
        let mut n = node("1:1", "n");
        n.absolute_bounding_box = Some(fmcp_api::Rect {
            x: 0.0,
            y: 0.0,
            width: 200.0,
            height: 50.0,
        });
        let c = |kind, value| fmcp_api::Constraint { kind, value };
        assert_eq!(export_scale(&n, c(ConstraintKind::Scale, 3.0)), 3.0);
        assert_eq!(export_scale(&n, c(ConstraintKind::Width, 100.0)), 0.5);
        assert_eq!(export_scale(&n, c(ConstraintKind::Height, 100.0)), 2.0);
        assert_eq!(export_scale(&n, c(ConstraintKind::Scale, 10.0)), MAX_SCALE);
        assert_eq!(export_scale(&n, c(ConstraintKind::Scale, 0.0)), 1.0);
        n.absolute_bounding_box = None;
        assert_eq!(export_scale(&n, c(ConstraintKind::Width, 100.0)), 1.0);
    }
}
