//! In-process event store speaking the same HTTP/WebSocket contract as the real one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One ingest POST as the store saw it.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub content_length: Option<usize>,
    pub body: Vec<u8>,
}

struct Inner {
    logs: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    ingested: Mutex<Vec<Ingested>>,
    reject_ingest: AtomicBool,
    drop_follow_after: Mutex<Option<usize>>,
    follow_connections: AtomicUsize,
    ignore_follow_frames: AtomicBool,
    refuse_append_streams: AtomicBool,
    changed: watch::Sender<u64>,
}

#[derive(Clone)]
struct StoreState {
    inner: Arc<Inner>,
}

impl StoreState {
    fn append(&self, log: &str, record: Vec<u8>) -> bool {
        {
            let mut logs = self.inner.logs.lock().unwrap();
            match logs.get_mut(log) {
                Some(records) => records.push(record),
                None => return false,
            }
        }
        self.inner.changed.send_modify(|version| *version += 1);
        true
    }

    fn records_from(&self, log: &str, position: usize) -> Option<Vec<Vec<u8>>> {
        let logs = self.inner.logs.lock().unwrap();
        logs.get(log)
            .map(|records| records.iter().skip(position).cloned().collect())
    }

    fn info(&self, log: &str) -> Option<serde_json::Value> {
        let logs = self.inner.logs.lock().unwrap();
        logs.get(log).map(|records| {
            json!({
                "name": log,
                "status": "online",
                "record_count": records.len(),
                "file_size": records.iter().map(Vec::len).sum::<usize>(),
                "start_position": 0,
                "end_position": records.len(),
            })
        })
    }
}

pub struct FakeStore {
    pub addr: SocketAddr,
    state: StoreState,
    server: JoinHandle<()>,
}

impl FakeStore {
    /// Start a store that already has the given (empty) logs.
    pub async fn start(logs: &[&str]) -> Self {
        let (changed, _) = watch::channel(0u64);
        let state = StoreState {
            inner: Arc::new(Inner {
                logs: Mutex::new(
                    logs.iter()
                        .map(|log| (log.to_string(), Vec::new()))
                        .collect(),
                ),
                ingested: Mutex::new(Vec::new()),
                reject_ingest: AtomicBool::new(false),
                drop_follow_after: Mutex::new(None),
                follow_connections: AtomicUsize::new(0),
                ignore_follow_frames: AtomicBool::new(false),
                refuse_append_streams: AtomicBool::new(false),
                changed,
            }),
        };

        let app = Router::new()
            .route("/logs", post(create_log))
            .route("/logs/:name", get(log_info))
            .route("/logs/:name/records", post(ingest).get(records_ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn has_log(&self, log: &str) -> bool {
        self.state.inner.logs.lock().unwrap().contains_key(log)
    }

    pub fn append(&self, log: &str, record: impl Into<Vec<u8>>) {
        assert!(self.state.append(log, record.into()), "log {} missing", log);
    }

    pub fn records(&self, log: &str) -> Vec<Vec<u8>> {
        self.state.records_from(log, 0).unwrap_or_default()
    }

    pub fn ingested(&self) -> Vec<Ingested> {
        self.state.inner.ingested.lock().unwrap().clone()
    }

    /// Answer every ingest POST with 500 and store nothing.
    pub fn reject_ingest(&self, reject: bool) {
        self.state.inner.reject_ingest.store(reject, Ordering::SeqCst);
    }

    /// Cut the next follow connection abruptly after it delivered `records`.
    pub fn drop_next_follow_after(&self, records: usize) {
        *self.state.inner.drop_follow_after.lock().unwrap() = Some(records);
    }

    /// Stop reading from follow connections, so pings go unanswered.
    pub fn ignore_follow_frames(&self, ignore: bool) {
        self.state.inner.ignore_follow_frames.store(ignore, Ordering::SeqCst);
    }

    /// Answer streaming append upgrades with 503 until switched back.
    pub fn refuse_append_streams(&self, refuse: bool) {
        self.state.inner.refuse_append_streams.store(refuse, Ordering::SeqCst);
    }

    pub fn follow_connections(&self) -> usize {
        self.state.inner.follow_connections.load(Ordering::SeqCst)
    }

    /// Poll until `log` holds at least `count` records.
    pub async fn wait_for_records(&self, log: &str, count: usize) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let records = self.records(log);
            if records.len() >= count {
                return records;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} records in {}, have {}",
                    count,
                    log,
                    records.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_ingested(&self, count: usize) -> Vec<Ingested> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let ingested = self.ingested();
            if ingested.len() >= count {
                return ingested;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {} ingest requests", count);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[derive(Deserialize)]
struct CreateLogForm {
    name: String,
}

async fn create_log(State(state): State<StoreState>, Form(form): Form<CreateLogForm>) -> Response {
    {
        let mut logs = state.inner.logs.lock().unwrap();
        if logs.contains_key(&form.name) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "log_exist", "message": "api: log already exists"})),
            )
                .into_response();
        }
        logs.insert(form.name.clone(), Vec::new());
    }
    match state.info(&form.name) {
        Some(info) => Json(info).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn log_info(State(state): State<StoreState>, Path(name): Path<String>) -> Response {
    match state.info(&name) {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"code": "log_not_found", "message": "api: log not found"})),
        )
            .into_response(),
    }
}

async fn ingest(
    State(state): State<StoreState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.inner.reject_ingest.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    state.inner.ingested.lock().unwrap().push(Ingested {
        content_length,
        body: body.to_vec(),
    });

    if state.append(&name, body.to_vec()) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    #[serde(default)]
    follow: bool,
    #[serde(default)]
    position: usize,
}

async fn records_ws(
    ws: WebSocketUpgrade,
    State(state): State<StoreState>,
    Path(name): Path<String>,
    Query(params): Query<ReadParams>,
    headers: HeaderMap,
) -> Response {
    if !state.inner.logs.lock().unwrap().contains_key(&name) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let write_mode = headers
        .get("x-http-method-override")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("POST"))
        .unwrap_or(false);

    if write_mode {
        if state.inner.refuse_append_streams.load(Ordering::SeqCst) {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        ws.on_upgrade(move |socket| write_records(socket, state, name))
    } else {
        state.inner.follow_connections.fetch_add(1, Ordering::SeqCst);
        let drop_after = state.inner.drop_follow_after.lock().unwrap().take();
        ws.on_upgrade(move |socket| read_records(socket, state, name, params, drop_after))
    }
}

async fn write_records(mut socket: WebSocket, state: StoreState, name: String) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                state.append(&name, text.into_bytes());
            }
            Message::Binary(bytes) => {
                state.append(&name, bytes);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn read_records(
    mut socket: WebSocket,
    state: StoreState,
    name: String,
    params: ReadParams,
    drop_after: Option<usize>,
) {
    let mut changed = state.inner.changed.subscribe();
    let mut position = params.position;
    let mut sent = 0usize;

    loop {
        let pending = state.records_from(&name, position).unwrap_or_default();
        for record in pending {
            if drop_after == Some(sent) {
                // No close frame: simulate a connection reset.
                return;
            }
            if socket.send(Message::Binary(record)).await.is_err() {
                return;
            }
            position += 1;
            sent += 1;
        }

        if !params.follow {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }

        if state.inner.ignore_follow_frames.load(Ordering::SeqCst) {
            if changed.changed().await.is_err() {
                return;
            }
            continue;
        }

        tokio::select! {
            result = changed.changed() => {
                if result.is_err() {
                    return;
                }
            }
            msg = socket.recv() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
