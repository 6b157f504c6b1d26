//! Async client for the Figma REST API v1.

use crate::cache::ResponseCache;
use crate::error::FigmaError;
use crate::types::{FileResponse, ImageFormat, ImagesResponse, NodesResponse, validate_file_key};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://api.figma.com/v1";

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Client settings. Use [`ClientConfig::new`] for defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Personal access token sent as `X-Figma-Token`.
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub cache_ttl: Duration,
    /// Zero disables the response cache.
    pub cache_max_entries: usize,
    pub max_concurrent_requests: usize,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 100,
            max_concurrent_requests: 5,
        }
    }
}

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    cache: ResponseCache,
    limiter: Semaphore,
}

/// Figma REST client with retry, response caching and a request limiter.
///
/// Cloning is cheap; clones share the cache and the limiter.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.config.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, FigmaError> {
        if config.api_key.trim().is_empty() {
            return Err(FigmaError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("fmcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                cache: ResponseCache::new(config.cache_ttl, config.cache_max_entries),
                limiter: Semaphore::new(config.max_concurrent_requests.max(1)),
                config,
            }),
        })
    }

    /// Fetch a whole file, optionally truncated to `depth` levels.
    pub async fn get_file(
        &self,
        file_key: &str,
        depth: Option<u32>,
    ) -> Result<FileResponse, FigmaError> {
        let file_key = validate_file_key(file_key)?;
        let mut query = Vec::new();
        if let Some(depth) = depth {
            query.push(("depth", depth.to_string()));
        }
        self.get_typed(&format!("/files/{file_key}"), &query, true)
            .await
    }

    /// Fetch specific nodes (and their subtrees) of a file.
    pub async fn get_file_nodes(
        &self,
        file_key: &str,
        node_ids: &[String],
        depth: Option<u32>,
    ) -> Result<NodesResponse, FigmaError> {
        let file_key = validate_file_key(file_key)?;
        if node_ids.is_empty() {
            return Err(FigmaError::EmptyNodeIds);
        }
        let mut query = vec![
            ("ids", node_ids.join(",")),
            ("use_absolute_bounds", "true".to_string()),
        ];
        if let Some(depth) = depth {
            query.push(("depth", depth.to_string()));
        }
        self.get_typed(&format!("/files/{file_key}/nodes"), &query, true)
            .await
    }

    /// Ask Figma to render nodes and return a signed URL per node id.
    ///
    /// Ids Figma could not render map to `None`. Signed URLs expire, so these
    /// responses are never cached.
    pub async fn get_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        format: ImageFormat,
        scale: f64,
    ) -> Result<HashMap<String, Option<String>>, FigmaError> {
        let file_key = validate_file_key(file_key)?;
        if node_ids.is_empty() {
            return Err(FigmaError::EmptyNodeIds);
        }
        let query = vec![
            ("ids", node_ids.join(",")),
            ("format", format.as_str().to_string()),
            ("scale", scale.to_string()),
            ("use_absolute_bounds", "true".to_string()),
        ];
        let resp: ImagesResponse = self
            .get_typed(&format!("/images/{file_key}"), &query, false)
            .await?;
        if let Some(err) = resp.err {
            return Err(FigmaError::Api(err));
        }
        Ok(resp.images)
    }

    /// Download the bytes behind a signed image URL.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, FigmaError> {
        let url = Url::parse(url).map_err(|e| FigmaError::Url(e.to_string()))?;
        let resp = self
            .send_with_retry(|| self.inner.http.get(url.clone()))
            .await?;
        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        cacheable: bool,
    ) -> Result<T, FigmaError> {
        let value = self.get_json(path, query, cacheable).await?;
        Ok(T::deserialize(value.as_ref())?)
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        cacheable: bool,
    ) -> Result<Arc<Value>, FigmaError> {
        let url = build_url(&self.inner.config.base_url, path, query)?;
        if cacheable && let Some(hit) = self.inner.cache.get(url.as_str()).await {
            debug!(url = %url, "figma cache hit");
            return Ok(hit);
        }

        let token = self.inner.config.api_key.clone();
        let resp = self
            .send_with_retry(|| {
                self.inner
                    .http
                    .get(url.clone())
                    .header("X-Figma-Token", &token)
            })
            .await?;
        let value = Arc::new(resp.json::<Value>().await?);
        if cacheable {
            self.inner
                .cache
                .insert(url.to_string(), value.clone())
                .await;
        }
        Ok(value)
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, FigmaError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let _permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|_| FigmaError::Api("request limiter closed".into()))?;
        let max_attempts = self.inner.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match status {
                        401 | 403 => return Err(FigmaError::Unauthorized(status)),
                        404 => return Err(FigmaError::NotFound(resp.url().path().to_string())),
                        429 => FigmaError::RateLimited { attempts: attempt },
                        _ => FigmaError::Status {
                            status,
                            message: resp.text().await.unwrap_or_default(),
                        },
                    }
                }
                Err(e) => FigmaError::Http(e),
            };
            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }
            let delay = backoff_delay(self.inner.config.retry_base_delay, attempt);
            warn!(attempt, ?delay, error = %err, "retrying figma request");
            tokio::time::sleep(delay).await;
        }
    }
}

fn build_url(base: &str, path: &str, query: &[(&str, String)]) -> Result<Url, FigmaError> {
    let mut url = Url::parse(&format!("{}{}", base.trim_end_matches('/'), path))
        .map_err(|e| FigmaError::Url(e.to_string()))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 30), MAX_BACKOFF);
    }

    #[test]
    fn url_carries_query() {
        let url = build_url(
            "https://api.figma.com/v1/",
            "/images/abc",
            &[("ids", "1:2,3:4".into()), ("format", "svg".into())],
        )
        .unwrap();
        assert_eq!(url.path(), "/v1/images/abc");
        assert_eq!(url.query(), Some("ids=1%3A2%2C3%3A4&format=svg"));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = Client::new(ClientConfig::new("  ")).unwrap_err();
        assert!(matches!(err, FigmaError::MissingApiKey));
    }

    #[tokio::test]
    async fn invalid_file_key_fails_before_network() {
        let client = Client::new(ClientConfig::new("token")).unwrap();
        let err = client.get_file("not a key", None).await.unwrap_err();
        assert!(matches!(err, FigmaError::InvalidFileKey(_)));
        let err = client
            .get_images("abc", &[], ImageFormat::Png, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FigmaError::EmptyNodeIds));
    }
}
