use std::sync::Arc;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use common::{AdminError, RequestFailure, StreamInfoResponse, StreamStats, TransportError, STREAMS_API_PATH};

use crate::status_poller::StreamStatsSource;
use crate::transport::{join_path, HttpRequest, HttpResponse, HttpTransport, Method};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAdminConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/// Strip a trailing `/admin` or `/admin/`, then any trailing `/`
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url
        .strip_suffix("/admin/")
        .or_else(|| base_url.strip_suffix("/admin"))
        .unwrap_or(base_url);
    trimmed.trim_end_matches('/').to_string()
}

pub fn basic_auth_header(username: &str, password: &str) -> String {
    let credentials = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", credentials)
}

/// 流媒体服务器管理接口客户端
pub struct StreamAdminClient {
    base_url: String,
    authorization: String,
    transport: Arc<dyn HttpTransport>,
}

impl StreamAdminClient {
    pub fn new(config: &StreamAdminConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, AdminError> {
        let base_url = normalize_base_url(&config.base_url);

        match Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(AdminError::InvalidBaseUrl {
                    url: config.base_url.clone(),
                })
            }
        }

        Ok(Self {
            base_url,
            authorization: basic_auth_header(&config.username, &config.password),
            transport,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server is reachable and accepts the credentials
    pub async fn validate(&self) -> Result<Value, AdminError> {
        let request = self.request(Method::Get, self.streams_url());

        let result = match self.send(request).await {
            Ok(response) => response.json_or_null().map_err(RequestFailure::from),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            error!("Connection error: {}", e);
            AdminError::Connection { source: e }
        })
    }

    /// Create the stream or replace its configuration
    pub async fn create_or_update<T>(&self, name: &str, config: &T) -> Result<Value, AdminError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(config).map_err(|e| AdminError::CreateStream {
            name: name.to_string(),
            source: RequestFailure::InvalidResponse {
                details: format!("stream config is not valid JSON: {}", e),
            },
        })?;

        let request = self
            .request(Method::Put, self.stream_url(name))
            .map(|request| request.json(body));

        let result = match self.send(request).await {
            Ok(response) => response.json_or_null().map_err(RequestFailure::from),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            error!(stream = name, "Create stream error: {}", e);
            AdminError::CreateStream {
                name: name.to_string(),
                source: e,
            }
        })
    }

    pub async fn delete(&self, name: &str) -> Result<(), AdminError> {
        let request = self.request(Method::Delete, self.stream_url(name));

        match self.send(request).await {
            Ok(_) => {
                debug!(stream = name, "Stream deleted");
                Ok(())
            }
            Err(e) => {
                error!(stream = name, "Delete stream error: {}", e);
                Err(AdminError::DeleteStream {
                    name: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// The stream's `stats` object, or an empty one if the server sent none
    ///
    /// Only a failed request is an error. A 2xx reply that is empty, `null`
    /// or not JSON at all yields empty stats.
    pub async fn get_info(&self, name: &str) -> Result<StreamStats, AdminError> {
        let request = self.request(Method::Get, self.stream_url(name));

        match self.send(request).await {
            Ok(response) => {
                let body = response.json_or_null().unwrap_or_else(|e| {
                    warn!(stream = name, "Unreadable stream info: {}", e);
                    Value::Null
                });
                Ok(StreamInfoResponse::stats_from(body))
            }
            Err(e) => {
                error!(stream = name, "Get stream info error: {}", e);
                Err(AdminError::GetInfo {
                    name: name.to_string(),
                    source: e,
                })
            }
        }
    }

    fn streams_url(&self) -> Result<String, TransportError> {
        join_path(&self.base_url, &Self::api_segments())
    }

    /// The stream name always lands in a single path segment
    fn stream_url(&self, name: &str) -> Result<String, TransportError> {
        let mut segments: Vec<&str> = Self::api_segments();
        segments.push(name);
        join_path(&self.base_url, &segments)
    }

    fn api_segments() -> Vec<&'static str> {
        STREAMS_API_PATH.split('/').filter(|s| !s.is_empty()).collect()
    }

    fn request(&self, method: Method, url: Result<String, TransportError>) -> Result<HttpRequest, TransportError> {
        let request = HttpRequest::new(method, url?)
            .header("Authorization", self.authorization.clone())
            .header("Content-Type", "application/json");
        Ok(request)
    }

    async fn send(&self, request: Result<HttpRequest, TransportError>) -> Result<HttpResponse, RequestFailure> {
        let response = self.transport.execute(request?).await?;
        response.error_for_status()
    }
}

#[async_trait]
impl StreamStatsSource for StreamAdminClient {
    async fn stream_stats(&self, name: &str) -> Result<StreamStats, AdminError> {
        self.get_info(name).await
    }
}
