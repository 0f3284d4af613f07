use thiserror::Error;

/// Failure of a single upstream call for one channel.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed upstream response: {0}")]
    Decode(String),
    #[error("channel not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Operation-level outcome of a cache operation.
///
/// Cloneable because callers attached to the same in-flight fetch all receive it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("every channel of feed {feed} failed: {message}")]
    AllChannelsFailed { feed: String, message: String },
    #[error("channel {channel} failed: {message}")]
    ChannelFailed { channel: String, message: String },
    #[error("feed {0} has no cached entry")]
    NotCached(String),
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl FetchError {
    /// Cancellation is an expected outcome and should not be reported as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            FetchError::Cancelled
        } else {
            FetchError::Task(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no configuration directory available")]
    NoConfigDir,
}
