use thiserror::Error;

/// Failure to exchange a request with a remote API at all
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },
}

/// Root cause attached to every named client error
#[derive(Error, Debug)]
pub enum RequestFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Server returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Invalid server response: {details}")]
    InvalidResponse { details: String },

    #[error("Failed to read upload source: {0}")]
    Source(#[from] std::io::Error),
}

impl RequestFailure {
    /// HTTP status code if the server answered with a non-2xx response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestFailure::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// 流媒体服务器管理接口错误
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Invalid streaming server URL: {url}")]
    InvalidBaseUrl { url: String },

    #[error("Failed to connect to streaming server: {source}")]
    Connection { source: RequestFailure },

    #[error("Failed to create stream {name}: {source}")]
    CreateStream { name: String, source: RequestFailure },

    #[error("Failed to delete stream {name}: {source}")]
    DeleteStream { name: String, source: RequestFailure },

    #[error("Failed to get stream info for {name}: {source}")]
    GetInfo { name: String, source: RequestFailure },
}

/// 分片上传错误
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to open upload session: {source}")]
    SessionOpen { source: RequestFailure },

    #[error("Chunk upload failed at offset {start_offset}: {source}")]
    ChunkUpload { start_offset: u64, source: RequestFailure },

    #[error("Failed to publish upload session {session_id}: {source}")]
    Publish { session_id: String, source: RequestFailure },
}

/// 身份认证错误
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity session not initialized")]
    NotInitialized,

    #[error("Failed to load identity provider: {reason}")]
    LoadFailed { reason: String },

    #[error("User cancelled login or did not fully authorize (missing: {})", .missing_scopes.join(", "))]
    LoginRejected { missing_scopes: Vec<String> },

    #[error("Graph API error: {message}")]
    Graph { message: String },

    #[error("Failed to read video source: {0}")]
    Source(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
