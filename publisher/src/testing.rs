//! Test doubles shared by the `*_test` modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use common::protocol::upload_fields as fields;
use common::{AdminError, GraphErrorEnvelope, RequestFailure, StreamStats, TransportError};

use crate::status_poller::StreamStatsSource;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::upload_manager::{EventHandler, UploadEvent};

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Transport that records every request and answers from a closure
pub struct MockTransport {
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with `status` and the JSON `body`
    pub fn json(status: u16, body: Value) -> Arc<Self> {
        Self::new(move |_| Ok(HttpResponse::json_value(status, &body)))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let message = message.to_string();
        Self::new(move |_| {
            Err(TransportError::Network {
                message: message.clone(),
            })
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests().pop().expect("at least one request")
    }

    /// Requests whose `upload_phase` field equals `phase`
    pub fn phase_requests(&self, phase: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.form_text(fields::UPLOAD_PHASE) == Some(phase))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(&request)
    }
}

pub fn graph_error_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json_value(status, &json!(GraphErrorEnvelope::new(message, 100)))
}

/// Behaviour of the scripted resumable-upload endpoint
#[derive(Debug, Clone)]
pub struct UploadScript {
    pub resume_offset: u64,
    /// 1-based index of the transfer call that fails with a 500
    pub fail_transfer: Option<usize>,
    pub open_status: u16,
    pub finish_success: bool,
    /// Report offsets as JSON numbers instead of strings
    pub numeric_offsets: bool,
}

impl Default for UploadScript {
    fn default() -> Self {
        Self {
            resume_offset: 0,
            fail_transfer: None,
            open_status: 200,
            finish_success: true,
            numeric_offsets: false,
        }
    }
}

fn offset_value(offset: u64, numeric: bool) -> Value {
    if numeric {
        json!(offset)
    } else {
        json!(offset.to_string())
    }
}

/// Transport emulating the three upload phases
pub fn scripted_upload_transport(script: UploadScript) -> Arc<MockTransport> {
    let transfers = AtomicUsize::new(0);

    MockTransport::new(move |request| {
        let phase = request.form_text(fields::UPLOAD_PHASE).unwrap_or_default();
        match phase {
            "start" => {
                if script.open_status != 200 {
                    return Ok(graph_error_response(script.open_status, "Invalid parameter"));
                }
                let file_size: u64 = request
                    .form_text(fields::FILE_SIZE)
                    .and_then(|size| size.parse().ok())
                    .unwrap_or(0);
                Ok(HttpResponse::json_value(
                    200,
                    &json!({
                        "video_id": "vid-1",
                        "upload_session_id": "session-1",
                        "start_offset": offset_value(script.resume_offset, script.numeric_offsets),
                        "end_offset": offset_value(file_size, script.numeric_offsets),
                    }),
                ))
            }
            "transfer" => {
                let call = transfers.fetch_add(1, Ordering::SeqCst) + 1;
                if script.fail_transfer == Some(call) {
                    return Ok(graph_error_response(500, "Transient upload failure"));
                }
                let start: u64 = request
                    .form_text(fields::START_OFFSET)
                    .and_then(|offset| offset.parse().ok())
                    .unwrap_or(0);
                let len = request.form_file(fields::CHUNK).map(|chunk| chunk.len()).unwrap_or(0);
                let next = start + len as u64;
                Ok(HttpResponse::json_value(
                    200,
                    &json!({
                        "start_offset": offset_value(next, script.numeric_offsets),
                        "end_offset": offset_value(next, script.numeric_offsets),
                    }),
                ))
            }
            "finish" => Ok(HttpResponse::json_value(
                200,
                &json!({ "success": script.finish_success, "post_id": "post-9" }),
            )),
            _ => Ok(graph_error_response(400, "Missing upload_phase")),
        }
    })
}

/// Collects every upload event
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<UploadEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UploadEvent::ProgressUpdate { progress, .. } => Some(progress),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for RecordingHandler {
    fn handle_event(&self, event: UploadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Stats source answering from a queue of scripted results
pub struct ScriptedStatsSource {
    results: Mutex<Vec<Result<StreamStats, u16>>>,
    fallback: Result<StreamStats, u16>,
    calls: AtomicUsize,
}

impl ScriptedStatsSource {
    /// Results are returned in order; `fallback` once they run out
    pub fn new(results: Vec<Result<StreamStats, u16>>, fallback: Result<StreamStats, u16>) -> Arc<Self> {
        let mut results = results;
        results.reverse();
        Arc::new(Self {
            results: Mutex::new(results),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(stats: StreamStats) -> Arc<Self> {
        Self::new(Vec::new(), Ok(stats))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamStatsSource for ScriptedStatsSource {
    async fn stream_stats(&self, name: &str) -> Result<StreamStats, AdminError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop();
        match next.unwrap_or_else(|| self.fallback.clone()) {
            Ok(stats) => Ok(stats),
            Err(code) => Err(AdminError::GetInfo {
                name: name.to_string(),
                source: RequestFailure::Status {
                    code,
                    message: "scripted failure".to_string(),
                },
            }),
        }
    }
}

/// Stats source whose fetch blocks until [`GatedStatsSource::release`]
pub struct GatedStatsSource {
    stats: StreamStats,
    entered: Notify,
    gate: Notify,
    finished: AtomicBool,
}

impl GatedStatsSource {
    pub fn new(stats: StreamStats) -> Arc<Self> {
        Arc::new(Self {
            stats,
            entered: Notify::new(),
            gate: Notify::new(),
            finished: AtomicBool::new(false),
        })
    }

    /// Wait until a fetch is blocked on the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamStatsSource for GatedStatsSource {
    async fn stream_stats(&self, _name: &str) -> Result<StreamStats, AdminError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(self.stats.clone())
    }
}
