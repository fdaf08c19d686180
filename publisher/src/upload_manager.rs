use std::sync::Arc;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::protocol::upload_fields as fields;
use common::{
    FinishResponse, PublishedVideo, RequestFailure, StartUploadResponse, TransferResponse,
    TransportError, UploadError, UploadPhase, UploadSession, VideoMetadata,
};

use crate::chunker::{ByteSource, ChunkIterator, ChunkRange, DEFAULT_CHUNK_SIZE};
use crate::identity::IdentitySession;
use crate::transport::{join_path, HttpRequest, HttpTransport};

/// Events that can be emitted by the UploadSessionClient
#[derive(Debug, Clone)]
pub enum UploadEvent {
    SessionOpened { upload_id: Uuid, session_id: String, file_size: u64 },
    ChunkSent { upload_id: Uuid, range: ChunkRange },
    ProgressUpdate { upload_id: Uuid, progress: f64, bytes_sent: u64 },
    Published { upload_id: Uuid, video: PublishedVideo },
    Failed { upload_id: Uuid, error: String },
}

/// Event handler trait for receiving upload events
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: UploadEvent);
}

/// Writes every upload event to the log
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn handle_event(&self, event: UploadEvent) {
        match event {
            UploadEvent::SessionOpened { upload_id, session_id, file_size } => {
                info!(%upload_id, %session_id, file_size, "Upload session opened");
            }
            UploadEvent::ChunkSent { upload_id, range } => {
                debug!(%upload_id, start = range.start, end = range.end, "Chunk sent");
            }
            UploadEvent::ProgressUpdate { upload_id, progress, bytes_sent } => {
                info!(%upload_id, bytes_sent, "Upload progress: {:.1}%", progress * 100.0);
            }
            UploadEvent::Published { upload_id, video } => {
                info!(%upload_id, video_id = ?video.video_id, "Video published");
            }
            UploadEvent::Failed { upload_id, error } => {
                warn!(%upload_id, "Upload failed: {}", error);
            }
        }
    }
}

/// Configuration for the UploadSessionClient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub chunk_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Graph video host and API version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEndpoint {
    pub video_url: String,
    pub api_version: String,
}

impl UploadEndpoint {
    pub fn new(video_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        }
    }

    pub fn videos_url(&self, page_id: &str) -> Result<String, TransportError> {
        join_path(&self.video_url, &[&self.api_version, page_id, "videos"])
    }
}

impl From<&IdentitySession> for UploadEndpoint {
    fn from(session: &IdentitySession) -> Self {
        Self::new(session.video_url.clone(), session.api_version.clone())
    }
}

/// Page the video is published to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub page_id: String,
    pub access_token: String,
}

impl UploadTarget {
    pub fn new(page_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            access_token: access_token.into(),
        }
    }
}

/// 可续传分片上传客户端
///
/// Opens a remote upload session, pushes the source one chunk at a time and
/// publishes the result. Exactly one chunk request is in flight at any time
/// and the first failure aborts the upload.
pub struct UploadSessionClient {
    config: UploadConfig,
    endpoint: UploadEndpoint,
    transport: Arc<dyn HttpTransport>,
    event_handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl UploadSessionClient {
    pub fn new(config: UploadConfig, endpoint: UploadEndpoint, transport: Arc<dyn HttpTransport>) -> Self {
        let config = if config.chunk_size == 0 {
            warn!("Chunk size 0 is invalid, using default of {} bytes", DEFAULT_CHUNK_SIZE);
            UploadConfig::default()
        } else {
            config
        };

        Self {
            config,
            endpoint,
            transport,
            event_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Add an event handler to receive upload events
    pub async fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.event_handlers.write().await;
        handlers.push(handler);
    }

    /// Upload `source` in chunks and publish it with `metadata`
    pub async fn upload<S>(
        &self,
        source: &S,
        target: &UploadTarget,
        metadata: &VideoMetadata,
    ) -> Result<PublishedVideo, UploadError>
    where
        S: ByteSource + ?Sized,
    {
        let upload_id = Uuid::new_v4();
        let result = self.run_upload(upload_id, source, target, metadata).await;

        match &result {
            Ok(video) => {
                self.emit_event(UploadEvent::Published {
                    upload_id,
                    video: video.clone(),
                })
                .await;
            }
            Err(e) => {
                self.emit_event(UploadEvent::Failed {
                    upload_id,
                    error: e.to_string(),
                })
                .await;
            }
        }

        result
    }

    async fn run_upload<S>(
        &self,
        upload_id: Uuid,
        source: &S,
        target: &UploadTarget,
        metadata: &VideoMetadata,
    ) -> Result<PublishedVideo, UploadError>
    where
        S: ByteSource + ?Sized,
    {
        let file_size = source.total_len();
        let session = self.open_session(target, file_size).await?;

        self.emit_event(UploadEvent::SessionOpened {
            upload_id,
            session_id: session.session_id.clone(),
            file_size,
        })
        .await;

        let mut chunks = ChunkIterator::new(file_size, self.config.chunk_size)
            .unwrap_or_else(|| ChunkIterator::with_default_size(file_size));
        if session.start_offset > 0 {
            info!(
                session_id = %session.session_id,
                "Resuming upload at offset {} of {}", session.start_offset, file_size
            );
            chunks.resume_from(session.start_offset);
        }

        while let Some(range) = chunks.next_chunk() {
            let data = source.read_range(range.start, range.end).await.map_err(|e| {
                error!("Failed to read bytes {}..{}: {}", range.start, range.end, e);
                UploadError::ChunkUpload {
                    start_offset: range.start,
                    source: RequestFailure::Source(e),
                }
            })?;

            self.transfer_chunk(target, &session.session_id, range, data).await?;

            self.emit_event(UploadEvent::ChunkSent { upload_id, range }).await;
            self.emit_event(UploadEvent::ProgressUpdate {
                upload_id,
                progress: chunks.progress(),
                bytes_sent: chunks.offset(),
            })
            .await;
        }

        self.publish(target, &session, metadata).await
    }

    /// `upload_phase=start`
    pub async fn open_session(&self, target: &UploadTarget, file_size: u64) -> Result<UploadSession, UploadError> {
        let request = self
            .phase_request(target, UploadPhase::Start)
            .map(|request| request.text_field(fields::FILE_SIZE, file_size.to_string()));

        match self.send_json::<StartUploadResponse>(request).await {
            Ok(reply) => {
                let session = reply.into_session(file_size);
                debug!(
                    session_id = %session.session_id,
                    start_offset = session.start_offset,
                    end_offset = session.end_offset,
                    "Upload session opened"
                );
                Ok(session)
            }
            Err(e) => {
                error!(page_id = %target.page_id, "Failed to open upload session: {}", e);
                Err(UploadError::SessionOpen { source: e })
            }
        }
    }

    /// `upload_phase=transfer` for one chunk
    pub async fn transfer_chunk(
        &self,
        target: &UploadTarget,
        session_id: &str,
        range: ChunkRange,
        data: bytes::Bytes,
    ) -> Result<TransferResponse, UploadError> {
        let request = self.phase_request(target, UploadPhase::Transfer).map(|request| {
            request
                .text_field(fields::SESSION_ID, session_id)
                .text_field(fields::START_OFFSET, range.start.to_string())
                .file_field(fields::CHUNK, "chunk", "application/octet-stream", data)
        });

        let result = self
            .send_json::<TransferResponse>(request)
            .await
            .and_then(|reply| match reply.start_offset {
                Some(next) if next != range.end => Err(RequestFailure::InvalidResponse {
                    details: format!("server expects offset {} but {} bytes were sent", next, range.end),
                }),
                _ => Ok(reply),
            });

        result.map_err(|e| {
            error!(session_id, "Chunk {}..{} failed: {}", range.start, range.end, e);
            UploadError::ChunkUpload {
                start_offset: range.start,
                source: e,
            }
        })
    }

    /// `upload_phase=finish`
    pub async fn publish(
        &self,
        target: &UploadTarget,
        session: &UploadSession,
        metadata: &VideoMetadata,
    ) -> Result<PublishedVideo, UploadError> {
        let request = self.phase_request(target, UploadPhase::Finish).map(|request| {
            let mut request = request
                .text_field(fields::SESSION_ID, session.session_id.clone())
                .text_field(fields::TITLE, metadata.title.clone())
                .text_field(fields::DESCRIPTION, metadata.description.clone())
                .text_field(fields::PRIVACY, metadata.privacy.to_graph_param());

            if let Some(category) = &metadata.category {
                request = request.text_field(fields::CATEGORY, category.clone());
            }
            if let Some(duration) = metadata.duration {
                request = request.text_field(fields::DURATION, duration.to_string());
            }
            request
        });

        let result = self.send_json::<FinishResponse>(request).await.and_then(|reply| {
            if reply.success {
                Ok(reply)
            } else {
                Err(RequestFailure::InvalidResponse {
                    details: "server reported success=false".to_string(),
                })
            }
        });

        match result {
            Ok(reply) => Ok(PublishedVideo {
                video_id: session.video_id.clone(),
                success: reply.success,
                metadata: reply.extra,
                published_at: Utc::now(),
            }),
            Err(e) => {
                error!(session_id = %session.session_id, "Failed to publish video: {}", e);
                Err(UploadError::Publish {
                    session_id: session.session_id.clone(),
                    source: e,
                })
            }
        }
    }

    fn phase_request(&self, target: &UploadTarget, phase: UploadPhase) -> Result<HttpRequest, TransportError> {
        let request = HttpRequest::post(self.endpoint.videos_url(&target.page_id)?)
            .text_field(fields::ACCESS_TOKEN, target.access_token.clone())
            .text_field(fields::UPLOAD_PHASE, phase.as_str());
        Ok(request)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: Result<HttpRequest, TransportError>,
    ) -> Result<T, RequestFailure> {
        let response = self.transport.execute(request?).await?.error_for_status()?;
        Ok(response.json::<T>()?)
    }

    async fn emit_event(&self, event: UploadEvent) {
        let handlers = self.event_handlers.read().await;
        for handler in handlers.iter() {
            handler.handle_event(event.clone());
        }
    }
}
