use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::StreamError;
use crate::models::Cursor;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Follow-mode read of one log, opened at an absolute position.
///
/// Record frames carry no position of their own. The store seeks to the
/// requested position and delivers in log order, so the n-th record received
/// is tagged `from + n`. Resuming without recounting therefore relies on the
/// store honouring `position`; the counter's duplicate check only guards
/// callers that replay tagged records themselves.
pub struct FollowSubscription {
    stream: WsStream,
    next_position: Cursor,
    idle_timeout: Duration,
}

impl FollowSubscription {
    pub async fn connect(
        url: &Url,
        from: Cursor,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let (stream, _) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| StreamError::Timeout("connect", connect_timeout))?
            .map_err(|e| StreamError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        tracing::info!(position = %from, "Source subscription open");

        Ok(Self {
            stream,
            next_position: from,
            idle_timeout,
        })
    }

    /// Wait for the next record.
    ///
    /// A quiet connection is pinged once after the idle timeout; if the next
    /// idle window also passes without a single frame it is declared dead.
    pub async fn next_record(&mut self) -> Result<(Cursor, Vec<u8>), StreamError> {
        let mut pinged = false;

        loop {
            let frame = match timeout(self.idle_timeout, self.stream.next()).await {
                Ok(frame) => frame,
                Err(_) if pinged => return Err(StreamError::Idle(self.idle_timeout * 2)),
                Err(_) => {
                    timeout(self.idle_timeout, self.stream.send(Message::Ping(Vec::new())))
                        .await
                        .map_err(|_| StreamError::Timeout("ping", self.idle_timeout))??;
                    pinged = true;
                    continue;
                }
            };

            match frame {
                None => return Err(StreamError::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => return Ok(self.tag(text.into_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Ok(self.tag(bytes)),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Source sent close frame");
                    return Err(StreamError::Closed);
                }
                Some(Ok(_)) => pinged = false,
            }
        }
    }

    fn tag(&mut self, payload: Vec<u8>) -> (Cursor, Vec<u8>) {
        let position = self.next_position;
        self.next_position = position.next();
        (position, payload)
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Source close failed: {}", e);
        }
    }
}
