// Library root - shared by the gateway and aggregator binaries and the tests

pub mod aggregator;
pub mod backoff;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod shutdown;

pub use aggregator::Aggregator;
pub use config::{AggregatorConfig, GatewayConfig, StartFrom, StoreConfig};
pub use error::{AggregatorError, CheckpointError, ConfigError, StoreError, StreamError};
pub use models::{Cursor, Event, Snapshot};
pub use services::EventStoreClient;

use std::sync::Arc;

/// Gateway request state. Read-only; shared by every in-flight request.
#[derive(Clone)]
pub struct AppState {
    pub store: EventStoreClient,
    pub config: Arc<GatewayConfig>,
}
