use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::config::StoreConfig;
use crate::error::{ConfigError, StoreError};
use crate::models::{Cursor, Event};

/// Header the store reads to treat a streaming connection as an append.
pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

const MAX_ERROR_BODY: usize = 512;

/// `GET /logs/{name}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LogInfo {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub record_count: i64,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub start_position: i64,
    #[serde(default)]
    pub end_position: i64,
}

/// HTTP client for the append-only log store.
///
/// Cheap to clone; every clone shares one connection pool. Each request is
/// bounded by the configured store timeout.
#[derive(Debug, Clone)]
pub struct EventStoreClient {
    client: Client,
    base_url: Url,
}

impl EventStoreClient {
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Base URLs are validated to be http(s) with a host, so they always have a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn stream_endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint(segments);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always a permitted scheme transition.
        let _ = url.set_scheme(scheme);
        url
    }

    /// `POST /logs/{name}/records` ingest endpoint.
    pub fn records_url(&self, log: &str) -> Url {
        self.endpoint(&["logs", log, "records"])
    }

    /// Follow-mode subscription starting at absolute position `from`.
    pub fn follow_url(&self, log: &str, from: Cursor) -> Url {
        let mut url = self.stream_endpoint(&["logs", log, "records"]);
        url.query_pairs_mut()
            .append_pair("follow", "true")
            .append_pair("whence", "origin")
            .append_pair("position", &from.0.to_string());
        url
    }

    /// Streaming append endpoint; must be opened with [`METHOD_OVERRIDE_HEADER`] set to `POST`.
    pub fn append_stream_url(&self, log: &str) -> Url {
        self.stream_endpoint(&["logs", log, "records"])
    }

    /// Push one event as a single record.
    ///
    /// The advertised `Content-Length` is the byte length of the encoded
    /// body, so multi-byte attribute values are accounted for.
    pub async fn append(&self, log: &str, event: &Event) -> Result<(), StoreError> {
        let url = self.records_url(log);
        let body = event.to_json_bytes()?;

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.to_string(),
                source,
            })?;

        check_status(url, response).await.map(|_| ())
    }

    pub async fn log_info(&self, log: &str) -> Result<LogInfo, StoreError> {
        let url = self.endpoint(&["logs", log]);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.to_string(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::LogNotFound(log.to_string()));
        }

        let response = check_status(url.clone(), response).await?;
        response
            .json::<LogInfo>()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.to_string(),
                source,
            })
    }

    pub async fn create_log(&self, log: &str) -> Result<LogInfo, StoreError> {
        let url = self.endpoint(&["logs"]);

        let response = self
            .client
            .post(url.clone())
            .form(&[("name", log)])
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.to_string(),
                source,
            })?;

        let response = check_status(url.clone(), response).await?;
        response
            .json::<LogInfo>()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.to_string(),
                source,
            })
    }

    /// Startup probe: the store must be reachable and `log` must exist.
    ///
    /// Any failure here is a configuration error and the caller is expected
    /// to refuse to start.
    pub async fn ensure_log(&self, log: &str, create_missing: bool) -> Result<LogInfo, ConfigError> {
        match self.log_info(log).await {
            Ok(info) => Ok(info),
            Err(StoreError::LogNotFound(_)) if create_missing => {
                tracing::info!(log, "Creating missing log on event store");
                self.create_log(log).await.map_err(|e| startup_error(&self.base_url, e))
            }
            Err(StoreError::LogNotFound(name)) => Err(ConfigError::LogMissing(name)),
            Err(e) => Err(startup_error(&self.base_url, e)),
        }
    }
}

fn startup_error(base_url: &Url, err: StoreError) -> ConfigError {
    match err {
        StoreError::Transport { source, .. } => ConfigError::StoreUnreachable {
            url: base_url.to_string(),
            reason: source.to_string(),
        },
        other => ConfigError::Store(other),
    }
}

async fn check_status(url: Url, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(StoreError::Status {
        url: url.to_string(),
        status,
        body,
    })
}
