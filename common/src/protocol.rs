use crate::types::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// 流媒体服务器管理接口路径
pub const STREAMS_API_PATH: &str = "/streamer/api/v3/streams";

/// 可续传上传阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Start,
    Transfer,
    Finish,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPhase::Start => "start",
            UploadPhase::Transfer => "transfer",
            UploadPhase::Finish => "finish",
        }
    }
}

/// Multipart field names of the resumable upload protocol
pub mod upload_fields {
    pub const UPLOAD_PHASE: &str = "upload_phase";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const FILE_SIZE: &str = "file_size";
    pub const SESSION_ID: &str = "upload_session_id";
    pub const START_OFFSET: &str = "start_offset";
    pub const CHUNK: &str = "video_file_chunk";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const PRIVACY: &str = "privacy";
    pub const CATEGORY: &str = "content_category";
    pub const DURATION: &str = "duration";
    pub const SOURCE: &str = "source";
}

/// Reply to `upload_phase=start`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub upload_session_id: String,
    #[serde(default, deserialize_with = "deserialize_offset")]
    pub start_offset: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_offset")]
    pub end_offset: Option<u64>,
}

impl StartUploadResponse {
    /// Session as seen by the client; a missing start offset means a fresh upload
    pub fn into_session(self, file_size: u64) -> UploadSession {
        let start_offset = self.start_offset.unwrap_or(0);
        UploadSession {
            session_id: self.upload_session_id,
            video_id: self.video_id,
            start_offset,
            end_offset: self.end_offset.unwrap_or(file_size),
        }
    }
}

/// Reply to `upload_phase=transfer`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferResponse {
    #[serde(default, deserialize_with = "deserialize_offset")]
    pub start_offset: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_offset")]
    pub end_offset: Option<u64>,
}

/// Reply to `upload_phase=finish`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinishResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reply to a single-shot video upload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Graph API error envelope: `{"error": {"message": ..., "type": ..., "code": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphErrorEnvelope {
    pub error: GraphErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbtrace_id: Option<String>,
}

impl GraphErrorEnvelope {
    pub fn new(message: impl Into<String>, code: i64) -> Self {
        Self {
            error: GraphErrorBody {
                message: message.into(),
                kind: Some("OAuthException".to_string()),
                code: Some(code),
                fbtrace_id: None,
            },
        }
    }
}

/// Paged Graph collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionEntry {
    pub permission: String,
    pub status: String,
}

impl PermissionEntry {
    pub fn is_granted(&self) -> bool {
        self.status == "granted"
    }
}

/// Reply to `GET /me?fields=id,permissions`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<GraphList<PermissionEntry>>,
}

impl MeResponse {
    pub fn granted_scopes(&self) -> Vec<String> {
        self.permissions
            .as_ref()
            .map(|list| {
                list.data
                    .iter()
                    .filter(|entry| entry.is_granted())
                    .map(|entry| entry.permission.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Reply to `GET /streamer/api/v3/streams/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamInfoResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stats", skip_serializing_if = "Option::is_none")]
    pub stats: Option<StreamStats>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamInfoResponse {
    /// Stats carried by a reply body; a null, non-object or stats-less body yields empty stats
    pub fn stats_from(body: Value) -> StreamStats {
        serde_json::from_value::<Self>(body)
            .ok()
            .and_then(|info| info.stats)
            .unwrap_or_default()
    }
}

/// The Graph API reports offsets as decimal strings; accept plain numbers too.
fn deserialize_offset<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawOffset {
        Number(u64),
        Text(String),
    }

    match Option::<RawOffset>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawOffset::Number(n)) => Ok(Some(n)),
        Some(RawOffset::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_stats<'de, D>(deserializer: D) -> Result<Option<StreamStats>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|stats| serde_json::from_value(stats).ok()))
}
