//! Streaming aggregator: follows the events log, counts events per type and
//! appends the full count snapshot to the stats log after every record.
//!
//! All counting happens on the single task that drives [`Aggregator::run`].
//! Scaling out means one aggregator per partition of event types, never two
//! writers on one snapshot.

pub mod checkpoint;
pub mod counter;
pub mod sink;
pub mod source;

use std::future::Future;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::{AggregatorConfig, StartFrom};
use crate::error::{AggregatorError, StreamError};
use crate::models::{Cursor, Snapshot};
use crate::services::EventStoreClient;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use counter::{Outcome, StatsCounter};
pub use sink::{SinkSettings, StatsSink};
pub use source::FollowSubscription;

pub struct Aggregator {
    config: Arc<AggregatorConfig>,
    store: EventStoreClient,
    counter: StatsCounter,
    checkpoint: Option<CheckpointStore>,
    session_id: Uuid,
}

impl Aggregator {
    /// Probe both logs and pick the starting cursor.
    ///
    /// A saved checkpoint wins over `start_from`. Any store or checkpoint
    /// problem here is fatal.
    pub async fn prepare(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        let store = EventStoreClient::new(&config.store)?;
        let create = config.store.create_missing_logs;
        let source = store.ensure_log(&config.source_log, create).await?;
        store.ensure_log(&config.sink_log, create).await?;

        let checkpoint = config.checkpoint_path.clone().map(CheckpointStore::new);
        let restored = match &checkpoint {
            Some(cp) => cp.load().await?,
            None => None,
        };

        let counter = match restored {
            Some(saved) => {
                tracing::info!(
                    position = %saved.cursor,
                    types = saved.snapshot.len(),
                    saved_at = %saved.saved_at,
                    "Resuming from checkpoint"
                );
                StatsCounter::resume(saved.cursor, saved.snapshot)
            }
            None => {
                let start = match config.start_from {
                    StartFrom::Origin => Cursor(0),
                    StartFrom::End => Cursor(u64::try_from(source.end_position).unwrap_or(0)),
                };
                StatsCounter::new(start)
            }
        };

        Ok(Self::with_counter(config, store, counter, checkpoint))
    }

    /// Assemble an aggregator without probing the store.
    pub fn with_counter(
        config: AggregatorConfig,
        store: EventStoreClient,
        counter: StatsCounter,
        checkpoint: Option<CheckpointStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            counter,
            checkpoint,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.counter.cursor()
    }

    /// Consume until `shutdown` resolves, then flush and return the final counts.
    ///
    /// Connection loss never ends the run: the subscription is reopened at
    /// the cursor with exponential backoff. The backoff restarts on every
    /// successful connect, and an idle subscription is reopened immediately.
    pub async fn run<F>(self, shutdown: F) -> Result<Snapshot, AggregatorError>
    where
        F: Future<Output = ()>,
    {
        let span = tracing::info_span!(
            "aggregator",
            session = %self.session_id,
            source = %self.config.source_log,
            sink = %self.config.sink_log,
        );
        self.consume(shutdown).instrument(span).await
    }

    async fn consume<F>(mut self, shutdown: F) -> Result<Snapshot, AggregatorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let config = Arc::clone(&self.config);
        let sink = StatsSink::spawn(SinkSettings {
            url: self.store.append_stream_url(&config.sink_log),
            buffer: config.sink_buffer,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            backoff_initial: config.backoff_initial,
            backoff_max: config.backoff_max,
        });
        let mut backoff = Backoff::exponential(config.backoff_initial, config.backoff_max);
        let mut since_checkpoint: u64 = 0;

        'session: loop {
            let from = self.counter.cursor();
            let url = self.store.follow_url(&config.source_log, from);

            let connected = tokio::select! {
                _ = &mut shutdown => break 'session,
                result = FollowSubscription::connect(&url, from, config.connect_timeout, config.idle_timeout) => result,
            };
            let mut subscription = match connected {
                Ok(subscription) => {
                    backoff.reset();
                    subscription
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Source subscription failed");
                    tokio::select! {
                        _ = &mut shutdown => break 'session,
                        _ = sleep(delay) => continue 'session,
                    }
                }
            };

            loop {
                let record = tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        subscription.close().await;
                        break 'session;
                    }
                    record = subscription.next_record() => record,
                };

                let (position, payload) = match record {
                    Ok(record) => record,
                    Err(StreamError::Idle(quiet)) => {
                        // The store does not answer pings, so a quiet log looks like this.
                        tracing::debug!(
                            quiet_ms = quiet.as_millis() as u64,
                            position = %self.counter.cursor(),
                            "Source idle, resubscribing"
                        );
                        drop(subscription);
                        continue 'session;
                    }
                    Err(e) => {
                        let delay = backoff.on_failure();
                        tracing::warn!(
                            error = %e,
                            position = %self.counter.cursor(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Source stream lost, resubscribing"
                        );
                        drop(subscription);
                        tokio::select! {
                            _ = &mut shutdown => break 'session,
                            _ = sleep(delay) => continue 'session,
                        }
                    }
                };

                match self.counter.apply(position, &payload) {
                    Outcome::Counted => {
                        let body = self.counter.snapshot().to_json()?;
                        tokio::select! {
                            biased;
                            _ = &mut shutdown => {
                                tracing::warn!(%position, "Shutdown while sink is backlogged, last snapshot not queued");
                                subscription.close().await;
                                break 'session;
                            }
                            published = sink.publish(body) => published?,
                        }

                        since_checkpoint += 1;
                        if config.checkpoint_every > 0 && since_checkpoint >= config.checkpoint_every {
                            self.save_checkpoint().await;
                            since_checkpoint = 0;
                        }
                    }
                    Outcome::Duplicate => {
                        tracing::debug!(%position, "Skipping already counted record");
                    }
                    Outcome::Malformed(e) => {
                        tracing::warn!(%position, error = %e, "Skipping malformed record");
                    }
                }
            }
        }

        tracing::info!(position = %self.counter.cursor(), "Aggregator stopping");
        sink.close(config.shutdown_grace).await;
        self.save_checkpoint().await;

        Ok(self.counter.into_snapshot())
    }

    async fn save_checkpoint(&self) {
        let Some(checkpoint) = &self.checkpoint else {
            return;
        };
        match checkpoint.save(self.counter.cursor(), self.counter.snapshot()).await {
            Ok(()) => tracing::debug!(position = %self.counter.cursor(), "Checkpoint saved"),
            Err(e) => tracing::error!(path = %checkpoint.path().display(), error = %e, "Failed to save checkpoint"),
        }
    }
}
