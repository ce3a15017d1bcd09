use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Failures talking to the event store over plain HTTP.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("log {0} not found")]
    LogNotFound(String),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures on a streaming (WebSocket) connection to the event store.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("no frames received for {0:?}")]
    Idle(Duration),
    #[error("stream closed by peer")]
    Closed,
    #[error("stream transport error: {0}")]
    Transport(#[from] Box<tungstenite::Error>),
}

impl From<tungstenite::Error> for StreamError {
    fn from(e: tungstenite::Error) -> Self {
        StreamError::Transport(Box::new(e))
    }
}

/// Fatal startup problems. A component that hits one of these must not run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("event store at {url} is unreachable: {reason}")]
    StoreUnreachable { url: String, reason: String },
    #[error("log {0} does not exist on the event store (set STORE_CREATE_LOGS=true to create it)")]
    LogMissing(String),
    #[error("event store rejected startup probe: {0}")]
    Store(#[source] StoreError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sink(#[from] crate::aggregator::sink::SinkStopped),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}
