use thiserror::Error;

/// Errors from the Figma REST client.
#[derive(Error, Debug)]
pub enum FigmaError {
    /// No API token was configured.
    #[error("figma API key is missing")]
    MissingApiKey,

    /// The file key is empty or contains characters Figma never emits.
    #[error("invalid figma file key: {0:?}")]
    InvalidFileKey(String),

    /// A request needed at least one node id.
    #[error("no node ids were provided")]
    EmptyNodeIds,

    /// The token was rejected.
    #[error("figma rejected the API key (status {0})")]
    Unauthorized(u16),

    /// The file or node does not exist or is not shared with the token owner.
    #[error("figma resource not found: {0}")]
    NotFound(String),

    /// Retries were exhausted while the API kept answering 429.
    #[error("figma rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Any other non-success status.
    #[error("figma returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The configured base URL cannot be combined with a request path.
    #[error("invalid request URL: {0}")]
    Url(String),

    /// Figma answered 200 but reported an error in the body.
    #[error("figma API error: {0}")]
    Api(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FigmaError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FigmaError::RateLimited { .. } => true,
            FigmaError::Status { status, .. } => *status >= 500,
            FigmaError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
