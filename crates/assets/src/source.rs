//! [`AssetSource`] trait: where node metadata and rendered bytes come from.

use fmcp_api::{Client, FigmaError, ImageFormat, Node};
use std::collections::HashMap;

/// Remote operations a download batch needs.
pub trait AssetSource: Send + Sync {
    /// Documents for the given node ids, keyed by id. Unknown ids are absent.
    fn file_nodes(
        &self,
        file_key: &str,
        node_ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Node>, FigmaError>> + Send;

    /// A signed render URL per node id, `None` where rendering failed.
    fn image_urls(
        &self,
        file_key: &str,
        node_ids: &[String],
        format: ImageFormat,
        scale: f64,
    ) -> impl Future<Output = Result<HashMap<String, Option<String>>, FigmaError>> + Send;

    /// Raw bytes behind a render URL.
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FigmaError>> + Send;
}

impl AssetSource for Client {
    async fn file_nodes(
        &self,
        file_key: &str,
        node_ids: &[String],
    ) -> Result<HashMap<String, Node>, FigmaError> {
        Ok(self.get_file_nodes(file_key, node_ids, None).await?.into_documents())
    }

    async fn image_urls(
        &self,
        file_key: &str,
        node_ids: &[String],
        format: ImageFormat,
        scale: f64,
    ) -> Result<HashMap<String, Option<String>>, FigmaError> {
        self.get_images(file_key, node_ids, format, scale).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FigmaError> {
        self.download_bytes(url).await
    }
}
