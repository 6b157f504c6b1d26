//! Tool implementations for the Figma MCP server.

use crate::FigmaServer;
use fmcp_api::simplify::{simplify_file, simplify_nodes};
use fmcp_api::{Client, ImageFormat, normalize_node_id};
use fmcp_assets::resolve::DEFAULT_ASSET_DIR;
use fmcp_assets::{
    DownloadOptions, Downloader, Environment, PathResolver, ResolvedPath, WorkspaceCandidate,
    WorkspaceLocator,
};
use rmcp::{
    handler::server::wrapper::Parameters,
    schemars::{self, JsonSchema},
    tool, tool_router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameters for fetching design data.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetFigmaDataParams {
    /// File key from the Figma URL (figma.com/file/<key>/...).
    pub file_key: String,
    /// Node to fetch instead of the whole file ("1:2" or "1-2").
    pub node_id: Option<String>,
    /// How many levels of the tree to include.
    pub depth: Option<u32>,
}

/// Parameters for rendering nodes as images.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadImagesParams {
    /// File key from the Figma URL.
    pub file_key: String,
    /// Nodes to render.
    pub node_ids: Vec<String>,
    /// Destination directory, relative to the project root or absolute.
    pub local_path: String,
    /// Render scale between 0.01 and 4. Defaults to 1.
    pub scale: Option<f64>,
    /// One of png, jpg, svg, pdf. Defaults to png.
    pub format: Option<String>,
}

/// Parameters for rendering a subtree's export settings.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadExportAssetsParams {
    /// File key from the Figma URL.
    pub file_key: String,
    /// Root nodes whose subtrees are scanned for export settings.
    pub node_ids: Vec<String>,
    /// Destination directory, relative to the project root or absolute.
    pub local_path: String,
}

/// Parameters for the workspace diagnostic.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LocateWorkspaceParams {
    /// Path to resolve as a download destination would be.
    pub sample_path: Option<String>,
}

/// Output of `locate_workspace`.
#[derive(Debug, Serialize)]
struct WorkspaceReport {
    selected: WorkspaceCandidate,
    candidates: Vec<WorkspaceCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample: Option<ResolvedPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_error: Option<String>,
}

fn parse_format(format: Option<&str>) -> Result<Option<ImageFormat>, String> {
    match format {
        None => Ok(None),
        Some(f) => ImageFormat::parse(f)
            .map(Some)
            .ok_or_else(|| format!("Unsupported image format {f:?}; expected png, jpg, svg or pdf")),
    }
}

#[tool_router]
impl FigmaServer {
    /// Server whose workspace detection reads the process environment.
    pub fn new(client: Client) -> Self {
        let locator = WorkspaceLocator::new(Environment::from_process());
        Self::with_resolver(client, PathResolver::new(locator))
    }

    pub fn with_resolver(client: Client, resolver: PathResolver) -> Self {
        Self::with_downloader(client.clone(), Downloader::new(client, resolver))
    }

    pub fn with_downloader(client: Client, downloader: Downloader<Client>) -> Self {
        Self {
            client,
            downloader: Arc::new(downloader),
            tool_router: Self::tool_router(),
        }
    }

    /// Fetch a file or node as a simplified design tree.
    #[tool(
        description = "Get layout, styles and text of a Figma file, or of one node when node_id is given, as a simplified tree"
    )]
    async fn get_figma_data(
        &self,
        Parameters(params): Parameters<GetFigmaDataParams>,
    ) -> Result<String, String> {
        let node_id = params
            .node_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(normalize_node_id);
        let design = match node_id {
            Some(id) => {
                let requested = [id];
                let resp = self
                    .client
                    .get_file_nodes(&params.file_key, &requested, params.depth)
                    .await
                    .map_err(|e| e.to_string())?;
                simplify_nodes(resp, &requested)
            }
            None => {
                let file = self
                    .client
                    .get_file(&params.file_key, params.depth)
                    .await
                    .map_err(|e| e.to_string())?;
                simplify_file(file)
            }
        };
        serde_json::to_string_pretty(&design).map_err(|e| e.to_string())
    }

    /// Render nodes at one format and scale into a local directory.
    #[tool(
        description = "Download PNG, JPG, SVG or PDF renders of Figma nodes into a local directory. Relative paths resolve against the project root; system directories are refused"
    )]
    async fn download_figma_images(
        &self,
        Parameters(params): Parameters<DownloadImagesParams>,
    ) -> Result<String, String> {
        let options = DownloadOptions {
            scale: params.scale,
            format: parse_format(params.format.as_deref())?,
        };
        let report = self
            .downloader
            .download_images(&params.file_key, &params.node_ids, &params.local_path, options)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
    }

    /// Render every export setting configured under the given nodes.
    #[tool(
        description = "Download every asset configured in Figma's export settings under the given nodes, using each setting's format, scale and suffix"
    )]
    async fn download_figma_export_assets(
        &self,
        Parameters(params): Parameters<DownloadExportAssetsParams>,
    ) -> Result<String, String> {
        let report = self
            .downloader
            .download_images_with_export_settings(
                &params.file_key,
                &params.node_ids,
                &params.local_path,
            )
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
    }

    /// Report which workspace downloads resolve against.
    #[tool(
        description = "Show the detected project workspace, all candidates considered, and where a sample local path would be written"
    )]
    async fn locate_workspace(
        &self,
        Parameters(params): Parameters<LocateWorkspaceParams>,
    ) -> Result<String, String> {
        let resolver = self.downloader.resolver();
        let selected = resolver.locator().locate();
        let candidates = resolver.locator().candidates();
        let sample_path = params.sample_path.unwrap_or_else(|| DEFAULT_ASSET_DIR.into());
        let (sample, sample_error) = match resolver.resolve_in(&sample_path, Some(&selected)) {
            Ok(resolved) => (Some(resolved), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let report = WorkspaceReport {
            selected,
            candidates,
            sample,
            sample_error,
        };
        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
    }
}
