//! MCP server exposing Figma design data and asset downloads.
//!
//! Design data is returned as a simplified node tree. Downloads go through
//! `fmcp-assets`, which resolves the destination against the detected
//! workspace, refuses protected system locations and verifies every file
//! after the batch.

use fmcp_api::Client;
use fmcp_assets::Downloader;
use rmcp::{
    ServerHandler,
    handler::server::router::tool::ToolRouter,
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool_handler,
};
use std::sync::Arc;
pub mod tools;

/// Figma MCP server.
#[derive(Clone)]
pub struct FigmaServer {
    pub(crate) client: Client,
    pub(crate) downloader: Arc<Downloader<Client>>,
    pub(crate) tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for FigmaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "fmcp-figma".into(),
                title: Some("Figma MCP Server".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Figma server: read simplified design data and download rendered assets into the \
                 current workspace. Relative local paths resolve against the detected project root."
                    .into(),
            ),
        }
    }
}
