use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::protocol::upload_fields as fields;
use common::{GraphErrorEnvelope, ManagedPage, StreamStats, STREAMS_API_PATH};

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::stream_admin::basic_auth_header;

const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Graph error code for an invalid or expired token
const INVALID_TOKEN_CODE: i64 = 190;

/// 模拟厂商服务器配置
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    pub admin_username: String,
    pub admin_password: String,
    /// User token accepted by `/me`
    pub user_token: String,
    pub user_id: String,
    pub granted_scopes: Vec<String>,
    pub pages: Vec<ManagedPage>,
    /// Largest window offered per transfer
    pub max_chunk_size: u64,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_password: "secret".to_string(),
            user_token: "user-token".to_string(),
            user_id: "1000".to_string(),
            granted_scopes: crate::identity::DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            pages: vec![ManagedPage {
                id: "2000".to_string(),
                name: "Demo Page".to_string(),
                access_token: "page-token".to_string(),
                category: Some("Video Creator".to_string()),
                tasks: vec!["CREATE_CONTENT".to_string()],
            }],
            max_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
struct UploadSessionState {
    page_id: String,
    video_id: String,
    file_size: u64,
    received: BytesMut,
}

/// Video stored by a finished upload
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVideo {
    pub video_id: String,
    pub page_id: String,
    pub title: String,
    pub description: String,
    pub privacy: String,
    pub data: Bytes,
}

#[derive(Clone)]
struct MockState {
    config: Arc<MockServerConfig>,
    authorization: Arc<String>,
    streams: Arc<DashMap<String, Value>>,
    stats: Arc<DashMap<String, StreamStats>>,
    sessions: Arc<DashMap<String, UploadSessionState>>,
    videos: Arc<DashMap<String, StoredVideo>>,
    failing_transfers: Arc<AtomicUsize>,
    transfer_count: Arc<AtomicUsize>,
}

/// In-process stand-in for the streaming server and the Graph API
#[derive(Clone)]
pub struct MockVendorServer {
    state: MockState,
}

impl MockVendorServer {
    pub fn new(config: MockServerConfig) -> Self {
        let authorization = basic_auth_header(&config.admin_username, &config.admin_password);
        Self {
            state: MockState {
                config: Arc::new(config),
                authorization: Arc::new(authorization),
                streams: Arc::new(DashMap::new()),
                stats: Arc::new(DashMap::new()),
                sessions: Arc::new(DashMap::new()),
                videos: Arc::new(DashMap::new()),
                failing_transfers: Arc::new(AtomicUsize::new(0)),
                transfer_count: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    pub fn router(&self) -> Router {
        let streams_path = STREAMS_API_PATH;
        let stream_path = format!("{}/:name", STREAMS_API_PATH);

        Router::new()
            .route(streams_path, get(list_streams))
            .route(&stream_path, get(get_stream).put(put_stream).delete(delete_stream))
            .route("/graph/:version/me", get(graph_me))
            .route("/graph/:version/me/accounts", get(graph_accounts))
            .route("/graph-video/:version/:page_id/videos", post(graph_videos))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve in the background
    pub async fn spawn(&self, addr: SocketAddr) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router();

        info!("Mock vendor server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Mock vendor server stopped: {}", e);
            }
        });

        Ok((local_addr, handle))
    }

    /// Serve on `addr` until the process exits
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Mock vendor server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }

    pub fn set_stream_stats(&self, name: &str, stats: StreamStats) {
        self.state
            .streams
            .entry(name.to_string())
            .or_insert_with(|| json!({}));
        self.state.stats.insert(name.to_string(), stats);
    }

    pub fn stream_config(&self, name: &str) -> Option<Value> {
        self.state.streams.get(name).map(|entry| entry.value().clone())
    }

    /// Make the next `count` transfer requests fail with a 500
    pub fn fail_next_transfers(&self, count: usize) {
        self.state.failing_transfers.store(count, Ordering::SeqCst);
    }

    pub fn transfer_count(&self) -> usize {
        self.state.transfer_count.load(Ordering::SeqCst)
    }

    pub fn video(&self, video_id: &str) -> Option<StoredVideo> {
        self.state.videos.get(video_id).map(|entry| entry.value().clone())
    }

    pub fn videos(&self) -> Vec<StoredVideo> {
        self.state.videos.iter().map(|entry| entry.value().clone()).collect()
    }
}

fn graph_error(status: StatusCode, message: &str, code: i64) -> Response {
    (status, Json(GraphErrorEnvelope::new(message, code))).into_response()
}

fn is_authorized(state: &MockState, headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == state.authorization.as_str())
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

async fn list_streams(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if !is_authorized(&state, &headers) {
        return unauthorized();
    }

    let streams: Vec<Value> = state
        .streams
        .iter()
        .map(|entry| json!({ "name": entry.key() }))
        .collect();
    Json(json!({ "streams": streams })).into_response()
}

async fn get_stream(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !is_authorized(&state, &headers) {
        return unauthorized();
    }

    let Some(config) = state.streams.get(&name).map(|entry| entry.value().clone()) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "stream not found" }))).into_response();
    };

    let mut body = match config {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    body.insert("name".to_string(), Value::String(name.clone()));
    if let Some(stats) = state.stats.get(&name) {
        body.insert("stats".to_string(), json!(stats.value()));
    }

    Json(Value::Object(body)).into_response()
}

async fn put_stream(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(config): Json<Value>,
) -> Response {
    if !is_authorized(&state, &headers) {
        return unauthorized();
    }

    debug!(stream = %name, "Stream configured");
    state.streams.insert(name.clone(), config.clone());

    let mut body = match config {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    body.insert("name".to_string(), Value::String(name));
    Json(Value::Object(body)).into_response()
}

async fn delete_stream(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !is_authorized(&state, &headers) {
        return unauthorized();
    }

    if state.streams.remove(&name).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "stream not found" }))).into_response();
    }
    state.stats.remove(&name);
    StatusCode::NO_CONTENT.into_response()
}

async fn graph_me(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get(fields::ACCESS_TOKEN) != Some(&state.config.user_token) {
        return graph_error(StatusCode::BAD_REQUEST, "Invalid OAuth access token.", INVALID_TOKEN_CODE);
    }

    let permissions: Vec<Value> = state
        .config
        .granted_scopes
        .iter()
        .map(|scope| json!({ "permission": scope, "status": "granted" }))
        .collect();

    Json(json!({
        "id": state.config.user_id,
        "permissions": { "data": permissions }
    }))
    .into_response()
}

async fn graph_accounts(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get(fields::ACCESS_TOKEN) != Some(&state.config.user_token) {
        return graph_error(StatusCode::BAD_REQUEST, "Invalid OAuth access token.", INVALID_TOKEN_CODE);
    }

    Json(json!({ "data": state.config.pages })).into_response()
}

async fn graph_videos(
    State(state): State<MockState>,
    Path((_version, page_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    let mut form: HashMap<String, Bytes> = HashMap::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(data) => {
                        form.insert(name, data);
                    }
                    Err(e) => return graph_error(StatusCode::BAD_REQUEST, &e.to_string(), 100),
                }
            }
            Ok(None) => break,
            Err(e) => return graph_error(StatusCode::BAD_REQUEST, &e.to_string(), 100),
        }
    }

    let text = |name: &str| {
        form.get(name)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    };

    let token = text(fields::ACCESS_TOKEN).or_else(|| query.get(fields::ACCESS_TOKEN).cloned());
    let page_known = state
        .config
        .pages
        .iter()
        .any(|page| page.id == page_id && Some(&page.access_token) == token.as_ref());
    if !page_known {
        return graph_error(StatusCode::BAD_REQUEST, "Invalid OAuth access token.", INVALID_TOKEN_CODE);
    }

    match text(fields::UPLOAD_PHASE).as_deref() {
        Some("start") => start_phase(&state, page_id, text(fields::FILE_SIZE)),
        Some("transfer") => transfer_phase(
            &state,
            text(fields::SESSION_ID),
            text(fields::START_OFFSET),
            form.get(fields::CHUNK).cloned(),
        ),
        Some("finish") => {
            let meta = VideoFields {
                title: text(fields::TITLE).unwrap_or_default(),
                description: text(fields::DESCRIPTION).unwrap_or_default(),
                privacy: text(fields::PRIVACY).unwrap_or_default(),
            };
            finish_phase(&state, text(fields::SESSION_ID), meta)
        }
        Some(other) => graph_error(
            StatusCode::BAD_REQUEST,
            &format!("Unknown upload phase {}", other),
            100,
        ),
        None => {
            let Some(source) = form.get(fields::SOURCE).cloned() else {
                return graph_error(StatusCode::BAD_REQUEST, "No video source supplied", 100);
            };
            let video_id = new_video_id();
            state.videos.insert(
                video_id.clone(),
                StoredVideo {
                    video_id: video_id.clone(),
                    page_id,
                    title: text(fields::TITLE).unwrap_or_default(),
                    description: text(fields::DESCRIPTION).unwrap_or_default(),
                    privacy: text(fields::PRIVACY).unwrap_or_default(),
                    data: source,
                },
            );
            Json(json!({ "id": video_id })).into_response()
        }
    }
}

struct VideoFields {
    title: String,
    description: String,
    privacy: String,
}

fn new_video_id() -> String {
    (Uuid::new_v4().as_u128() % 10_000_000_000_000_000).to_string()
}

fn window_end(state: &MockState, offset: u64, file_size: u64) -> u64 {
    offset.saturating_add(state.config.max_chunk_size).min(file_size)
}

fn start_phase(state: &MockState, page_id: String, file_size: Option<String>) -> Response {
    let Some(file_size) = file_size.and_then(|size| size.parse::<u64>().ok()) else {
        return graph_error(StatusCode::BAD_REQUEST, "file_size is required", 100);
    };

    let session_id = Uuid::new_v4().simple().to_string();
    let video_id = new_video_id();

    state.sessions.insert(
        session_id.clone(),
        UploadSessionState {
            page_id,
            video_id: video_id.clone(),
            file_size,
            received: BytesMut::new(),
        },
    );

    Json(json!({
        "video_id": video_id,
        "upload_session_id": session_id,
        "start_offset": "0",
        "end_offset": window_end(state, 0, file_size).to_string(),
    }))
    .into_response()
}

fn transfer_phase(
    state: &MockState,
    session_id: Option<String>,
    start_offset: Option<String>,
    chunk: Option<Bytes>,
) -> Response {
    state.transfer_count.fetch_add(1, Ordering::SeqCst);

    let injected = state
        .failing_transfers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if injected {
        return graph_error(StatusCode::INTERNAL_SERVER_ERROR, "An unexpected error has occurred.", 2);
    }

    let (Some(session_id), Some(chunk)) = (session_id, chunk) else {
        return graph_error(StatusCode::BAD_REQUEST, "upload_session_id and video_file_chunk are required", 100);
    };
    let Some(mut session) = state.sessions.get_mut(&session_id) else {
        return graph_error(StatusCode::BAD_REQUEST, "Unknown upload session", 100);
    };

    let expected = session.received.len() as u64;
    if start_offset.and_then(|offset| offset.parse::<u64>().ok()) != Some(expected) {
        return graph_error(
            StatusCode::BAD_REQUEST,
            &format!("Chunk must start at offset {}", expected),
            6001,
        );
    }
    if expected + chunk.len() as u64 > session.file_size {
        return graph_error(StatusCode::BAD_REQUEST, "Chunk exceeds declared file size", 6001);
    }

    session.received.extend_from_slice(&chunk);
    let next = session.received.len() as u64;

    Json(json!({
        "start_offset": next.to_string(),
        "end_offset": window_end(state, next, session.file_size).to_string(),
    }))
    .into_response()
}

fn finish_phase(state: &MockState, session_id: Option<String>, meta: VideoFields) -> Response {
    let Some((_, session)) = session_id.and_then(|id| state.sessions.remove(&id)) else {
        return graph_error(StatusCode::BAD_REQUEST, "Unknown upload session", 100);
    };

    if session.received.len() as u64 != session.file_size {
        let message = format!(
            "Upload incomplete: {} of {} bytes received",
            session.received.len(),
            session.file_size
        );
        return graph_error(StatusCode::BAD_REQUEST, &message, 6001);
    }

    info!(video_id = %session.video_id, bytes = session.file_size, "Video published");

    state.videos.insert(
        session.video_id.clone(),
        StoredVideo {
            video_id: session.video_id.clone(),
            page_id: session.page_id,
            title: meta.title,
            description: meta.description,
            privacy: meta.privacy,
            data: session.received.freeze(),
        },
    );

    Json(json!({ "success": true, "video_id": session.video_id })).into_response()
}
