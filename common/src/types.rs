use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 流质量标签
///
/// Heuristic label derived from the server-reported bitrate and dropped
/// frame counter. `Unknown` is only used before the first poll completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StreamQuality {
    Poor,
    Fair,
    Good,
    #[default]
    Unknown,
}

impl StreamQuality {
    /// Raw bitrate below which a stream is considered poor
    pub const LOW_BITRATE_THRESHOLD: f64 = 1000.0;

    /// Dropped frame count above which a stream is considered fair
    pub const DROPPED_FRAMES_THRESHOLD: u64 = 100;

    pub fn from_metrics(bitrate: f64, dropped_frames: u64) -> Self {
        if bitrate < Self::LOW_BITRATE_THRESHOLD {
            return StreamQuality::Poor;
        }
        if dropped_frames > Self::DROPPED_FRAMES_THRESHOLD {
            return StreamQuality::Fair;
        }
        StreamQuality::Good
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamQuality::Poor => "Poor",
            StreamQuality::Fair => "Fair",
            StreamQuality::Good => "Good",
            StreamQuality::Unknown => "N/A",
        }
    }
}

impl fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `stats` object returned by the streaming server for a single stream.
///
/// Only the fields the status poller reads are typed; everything else the
/// server sends is preserved in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamStats {
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f64>,

    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub dropped_frames: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamStats {
    /// True for the `{}` placeholder returned when the server omitted stats
    pub fn is_empty(&self) -> bool {
        self.alive.is_none()
            && self.bitrate.is_none()
            && self.dropped_frames.is_none()
            && self.clients.is_none()
            && self.extra.is_empty()
    }

    /// Number of connected clients; anything other than an array counts as zero
    pub fn client_count(&self) -> u64 {
        self.clients
            .as_ref()
            .and_then(Value::as_array)
            .map(|clients| clients.len() as u64)
            .unwrap_or(0)
    }
}

// Servers are loose about the types of these counters. A value of the wrong
// shape reads as absent instead of failing the whole stats object.

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| match value {
        Value::Bool(flag) => Some(flag),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|n: &f64| n.is_finite()))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let count = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64),
        _ => None,
    };
    Ok(count)
}

/// 流状态快照，每次轮询整体重算
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamStatusSnapshot {
    pub is_live: bool,
    pub viewers: u64,
    pub quality: StreamQuality,
    pub bitrate_kbps: u64,
}

impl Default for StreamStatusSnapshot {
    fn default() -> Self {
        Self {
            is_live: false,
            viewers: 0,
            quality: StreamQuality::Unknown,
            bitrate_kbps: 0,
        }
    }
}

impl StreamStatusSnapshot {
    /// Snapshot published when a poll cycle fails
    pub fn offline() -> Self {
        Self {
            is_live: false,
            viewers: 0,
            quality: StreamQuality::Poor,
            bitrate_kbps: 0,
        }
    }

    pub fn from_stats(stats: &StreamStats) -> Self {
        let bitrate = stats.bitrate.filter(|b| b.is_finite()).unwrap_or(0.0);
        let dropped_frames = stats.dropped_frames.unwrap_or(0);

        Self {
            is_live: stats.alive.unwrap_or(false),
            viewers: stats.client_count(),
            quality: StreamQuality::from_metrics(bitrate, dropped_frames),
            bitrate_kbps: (bitrate / 1000.0).round().max(0.0) as u64,
        }
    }
}

/// Stream definition sent to the streaming server on create/update
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StreamInput>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pushes: Vec<StreamPush>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamInput {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamPush {
    pub url: String,
}

/// 视频可见范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privacy {
    #[default]
    Everyone,
    AllFriends,
    FriendsOfFriends,
    #[serde(rename = "SELF")]
    SelfOnly,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Everyone => "EVERYONE",
            Privacy::AllFriends => "ALL_FRIENDS",
            Privacy::FriendsOfFriends => "FRIENDS_OF_FRIENDS",
            Privacy::SelfOnly => "SELF",
        }
    }

    /// Value of the Graph API `privacy` field, e.g. `{"value":"EVERYONE"}`
    pub fn to_graph_param(&self) -> String {
        serde_json::json!({ "value": self.as_str() }).to_string()
    }
}

impl std::str::FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EVERYONE" => Ok(Privacy::Everyone),
            "ALL_FRIENDS" => Ok(Privacy::AllFriends),
            "FRIENDS_OF_FRIENDS" => Ok(Privacy::FriendsOfFriends),
            "SELF" => Ok(Privacy::SelfOnly),
            other => Err(format!("unknown privacy setting: {}", other)),
        }
    }
}

/// Descriptive metadata attached to an uploaded video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Duration in seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl VideoMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            privacy: Privacy::default(),
            category: None,
            duration: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }
}

/// 服务器端可续传上传会话
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub video_id: Option<String>,
    /// Offset the server expects next
    pub start_offset: u64,
    /// End of the window the server is willing to accept
    pub end_offset: u64,
}

/// Result of a successful publish call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishedVideo {
    pub video_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub published_at: DateTime<Utc>,
}

/// A page the logged-in user can manage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedPage {
    pub id: String,
    pub name: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// 登录结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub access_token: String,
    pub user_id: String,
    pub granted_scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    Connected(AuthResponse),
    NotAuthorized,
    Unknown,
}

impl LoginStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LoginStatus::Connected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quality_thresholds() {
        assert_eq!(StreamQuality::from_metrics(999.0, 0), StreamQuality::Poor);
        assert_eq!(StreamQuality::from_metrics(999.0, 500), StreamQuality::Poor);
        assert_eq!(StreamQuality::from_metrics(1000.0, 101), StreamQuality::Fair);
        assert_eq!(StreamQuality::from_metrics(1000.0, 100), StreamQuality::Good);
        assert_eq!(StreamQuality::from_metrics(2_500_000.0, 0), StreamQuality::Good);
    }

    #[test]
    fn test_snapshot_from_stats() {
        let stats: StreamStats = serde_json::from_value(json!({
            "alive": true,
            "bitrate": 2_500_400,
            "dropped_frames": 3,
            "clients": [{"id": 1}, {"id": 2}],
            "input_error_rate": 0
        }))
        .unwrap();

        let snapshot = StreamStatusSnapshot::from_stats(&stats);
        assert!(snapshot.is_live);
        assert_eq!(snapshot.viewers, 2);
        assert_eq!(snapshot.quality, StreamQuality::Good);
        assert_eq!(snapshot.bitrate_kbps, 2500);
        assert!(stats.extra.contains_key("input_error_rate"));
    }

    #[test]
    fn test_snapshot_from_empty_stats() {
        let snapshot = StreamStatusSnapshot::from_stats(&StreamStats::default());
        assert_eq!(
            snapshot,
            StreamStatusSnapshot {
                is_live: false,
                viewers: 0,
                quality: StreamQuality::Poor,
                bitrate_kbps: 0,
            }
        );
    }

    #[test]
    fn test_non_array_clients_count_as_zero() {
        let stats: StreamStats = serde_json::from_value(json!({ "clients": 12 })).unwrap();
        assert_eq!(stats.client_count(), 0);
        assert!(!stats.is_empty());
    }

    #[test]
    fn test_loosely_typed_stats_fields() {
        let stats: StreamStats = serde_json::from_value(json!({
            "alive": 1,
            "bitrate": "1500",
            "dropped_frames": 120.7
        }))
        .unwrap();
        assert_eq!(stats.alive, Some(true));
        assert_eq!(stats.bitrate, Some(1500.0));
        assert_eq!(stats.dropped_frames, Some(120));

        let garbled: StreamStats = serde_json::from_value(json!({
            "alive": "maybe",
            "bitrate": {},
            "dropped_frames": -4,
            "clients": null
        }))
        .unwrap();
        assert_eq!(garbled.alive, None);
        assert_eq!(garbled.bitrate, None);
        assert_eq!(garbled.dropped_frames, None);
        assert_eq!(StreamStatusSnapshot::from_stats(&garbled).quality, StreamQuality::Poor);
    }

    #[test]
    fn test_privacy_graph_param() {
        assert_eq!(Privacy::Everyone.to_graph_param(), r#"{"value":"EVERYONE"}"#);
        assert_eq!(Privacy::SelfOnly.to_graph_param(), r#"{"value":"SELF"}"#);
        assert_eq!("friends_of_friends".parse::<Privacy>(), Ok(Privacy::FriendsOfFriends));
        assert!("public".parse::<Privacy>().is_err());
    }

    #[test]
    fn test_default_snapshot_is_unknown() {
        let snapshot = StreamStatusSnapshot::default();
        assert_eq!(snapshot.quality, StreamQuality::Unknown);
        assert_eq!(snapshot.quality.to_string(), "N/A");
    }
}
