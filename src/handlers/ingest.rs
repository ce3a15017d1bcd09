use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
};
use chrono::Utc;

use crate::error::StoreError;
use crate::models::Event;
use crate::services::EventStoreClient;
use crate::AppState;

/// Turn any inbound request into one event and push it to the store.
///
/// The caller always gets an empty `200 OK`; the push runs on its own task
/// and its outcome is only logged.
pub async fn ingest(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> StatusCode {
    let attributes = match query {
        Ok(Query(pairs)) => pairs,
        Err(e) => {
            tracing::warn!("Unreadable query string, recording event without attributes: {}", e);
            Vec::new()
        }
    };

    let event = Event::from_attributes(Utc::now(), attributes);
    let log = state.config.events_log.clone();
    tokio::spawn(async move {
        // Failures are already logged; a dropped push is accepted (at-most-once).
        let _ = forward_event(&state.store, &log, &event).await;
    });

    StatusCode::OK
}

/// One-shot push of `event` to `log`. No retry.
pub async fn forward_event(
    store: &EventStoreClient,
    log: &str,
    event: &Event,
) -> Result<(), StoreError> {
    let result = store.append(log, event).await;
    match &result {
        Ok(()) => tracing::debug!(log, "Event pushed"),
        Err(StoreError::Status { url, status, body }) => {
            tracing::warn!(target_url = %url, %status, body = %body, "Couldn't push event to store")
        }
        Err(e) => tracing::error!(log, error = %e, "Failed pushing event"),
    }
    result
}
