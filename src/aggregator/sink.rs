use std::time::Duration;

use futures_util::SinkExt;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use super::source::WsStream;
use crate::backoff::Backoff;
use crate::error::StreamError;
use crate::services::METHOD_OVERRIDE_HEADER;

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub url: Url,
    pub buffer: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Handle to the task that appends snapshots to the stats log.
///
/// Snapshots queue on a bounded channel. When it is full, [`StatsSink::publish`]
/// waits, which stalls the caller's read loop until the writer catches up.
pub struct StatsSink {
    tx: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
#[error("stats sink writer is no longer running")]
pub struct SinkStopped;

impl StatsSink {
    pub fn spawn(settings: SinkSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.buffer.max(1));
        let task = tokio::spawn(write_loop(settings, rx));
        Self { tx, task }
    }

    pub async fn publish(&self, snapshot: String) -> Result<(), SinkStopped> {
        self.tx.send(snapshot).await.map_err(|_| SinkStopped)
    }

    /// Stop accepting snapshots and give the writer `grace` to flush the queue.
    pub async fn close(self, grace: Duration) {
        let Self { tx, mut task } = self;
        drop(tx);

        match timeout(grace, &mut task).await {
            Ok(Ok(())) => tracing::debug!("Stats sink drained"),
            Ok(Err(e)) => tracing::error!("Stats sink writer failed: {}", e),
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "Stats sink did not drain in time, dropping backlog");
                task.abort();
            }
        }
    }
}

async fn open(settings: &SinkSettings) -> Result<WsStream, StreamError> {
    let mut request = settings.url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(HeaderName::from_static(METHOD_OVERRIDE_HEADER), HeaderValue::from_static("POST"));

    let (stream, _) = timeout(settings.connect_timeout, connect_async(request))
        .await
        .map_err(|_| StreamError::Timeout("connect", settings.connect_timeout))?
        .map_err(|e| StreamError::Connect {
            url: settings.url.to_string(),
            source: Box::new(e),
        })?;
    Ok(stream)
}

async fn write_loop(settings: SinkSettings, mut rx: mpsc::Receiver<String>) {
    let mut backoff = Backoff::exponential(settings.backoff_initial, settings.backoff_max);
    let mut conn: Option<WsStream> = None;

    while let Some(snapshot) = rx.recv().await {
        // The same snapshot is retried until written so emission order holds.
        loop {
            if conn.is_none() {
                match open(&settings).await {
                    Ok(stream) => {
                        tracing::info!(url = %settings.url, "Stats sink connected");
                        backoff.reset();
                        conn = Some(stream);
                    }
                    Err(e) => {
                        let delay = backoff.on_failure();
                        tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Stats sink unavailable");
                        sleep(delay).await;
                        continue;
                    }
                }
            }
            let Some(stream) = conn.as_mut() else {
                continue;
            };

            match timeout(settings.write_timeout, stream.send(Message::Text(snapshot.clone()))).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => tracing::warn!(error = %e, "Stats sink write failed, reconnecting"),
                Err(_) => tracing::warn!(
                    timeout_ms = settings.write_timeout.as_millis() as u64,
                    "Stats sink write timed out, reconnecting"
                ),
            }
            conn = None;
        }
    }

    if let Some(mut stream) = conn {
        match timeout(settings.write_timeout, stream.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Stats sink close failed: {}", e),
            Err(_) => tracing::debug!("Stats sink close timed out"),
        }
    }
}
