//! Binary entry point for the fmcp-figma MCP server.

use anyhow::Context;
use clap::Parser;
use fmcp_api::{Client, ClientConfig, DEFAULT_BASE_URL};
use fmcp_figma::FigmaServer;
use rmcp::ServiceExt;
use std::time::Duration;

/// Figma MCP server: design data and asset downloads over stdio.
#[derive(Parser)]
#[command(name = "fmcp-figma", version, about)]
struct Cli {
    /// Figma personal access token.
    #[arg(long, env = "FIGMA_API_KEY", hide_env_values = true)]
    figma_api_key: String,

    /// Figma REST API root.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// How long file and node responses stay cached.
    #[arg(long, default_value_t = 300)]
    cache_ttl_secs: u64,

    /// Cached responses kept at most; 0 disables the cache.
    #[arg(long, default_value_t = 100)]
    cache_max_entries: usize,

    /// Figma requests allowed in flight at once.
    #[arg(long, default_value_t = 5)]
    max_concurrent_requests: usize,

    /// Per-request timeout.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,
}

impl Cli {
    fn client_config(self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: self.cache_max_entries,
            max_concurrent_requests: self.max_concurrent_requests.max(1),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ClientConfig::new(self.figma_api_key)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
    let cli = Cli::parse();
    let config = cli.client_config();
    tracing::info!(base_url = %config.base_url, "starting fmcp-figma");
    let client = Client::new(config).context("invalid Figma client configuration")?;
    let server = FigmaServer::new(client);
    let transport = rmcp::transport::stdio();
    server
        .serve(transport)
        .await
        .context("failed to start server")?
        .waiting()
        .await
        .context("server error")?;
    Ok(())
}
