//! Ingestion gateway: web requests in, event records out to the store.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::error::ConfigError;
use crate::handlers;
use crate::services::EventStoreClient;
use crate::AppState;

/// Every method on every path is an ingest request.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::ingest)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the gateway state, probing the store first.
///
/// An unreachable store or a missing events log fails here instead of
/// silently dropping every event later.
pub async fn prepare(config: GatewayConfig) -> Result<AppState, ConfigError> {
    let store = EventStoreClient::new(&config.store)?;
    let info = store
        .ensure_log(&config.events_log, config.store.create_missing_logs)
        .await?;
    tracing::info!(
        log = %info.name,
        records = info.record_count,
        store = %store.base_url(),
        "Event store reachable"
    );

    Ok(AppState {
        store,
        config: Arc::new(config),
    })
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
