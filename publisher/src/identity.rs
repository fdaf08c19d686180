use std::path::Path;
use std::sync::Arc;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use common::protocol::upload_fields as fields;
use common::{
    AuthResponse, GraphList, IdentityError, LoginStatus, ManagedPage, MeResponse,
    TransportError, VideoMetadata, VideoUploadResponse,
};

use crate::transport::{join_path, HttpRequest, HttpResponse, HttpTransport};
use crate::validators::validate_url;

pub const DEFAULT_API_VERSION: &str = "v18.0";

/// Page permissions requested at login
pub const DEFAULT_SCOPES: [&str; 4] = [
    "pages_manage_posts",
    "pages_read_engagement",
    "pages_show_list",
    "pages_messaging",
];

/// True for Graph API versions of the form `vN.M`
pub fn is_valid_api_version(version: &str) -> bool {
    let Some(number) = version.strip_prefix('v') else {
        return false;
    };
    let mut parts = number.split('.');
    let (Some(major), Some(minor), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    [major, minor]
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub app_id: String,
    pub api_version: String,
    pub graph_url: String,
    pub video_url: String,
    pub cookie: bool,
    pub scopes: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            graph_url: "https://graph.facebook.com".to_string(),
            video_url: "https://graph-video.facebook.com".to_string(),
            cookie: true,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Initialized identity provider, passed to every identity operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySession {
    pub app_id: String,
    pub api_version: String,
    pub cookie: bool,
    pub graph_url: String,
    pub video_url: String,
    pub scopes: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

impl IdentitySession {
    fn graph_endpoint(&self, path: &[&str]) -> Result<String, TransportError> {
        let mut segments = vec![self.api_version.as_str()];
        segments.extend_from_slice(path);
        join_path(&self.graph_url, &segments)
    }

    fn videos_endpoint(&self, page_id: &str) -> Result<String, TransportError> {
        join_path(&self.video_url, &[&self.api_version, page_id, "videos"])
    }

    /// Configured scopes absent from `granted`
    pub fn missing_scopes(&self, granted: &[String]) -> Vec<String> {
        self.scopes
            .iter()
            .filter(|scope| !granted.contains(scope))
            .cloned()
            .collect()
    }
}

/// Single-shot upload of a whole video to a page
#[derive(Debug, Clone)]
pub struct VideoUploadRequest {
    pub page_id: String,
    pub page_access_token: String,
    pub file_name: String,
    pub content_type: String,
    pub source: Bytes,
    pub metadata: VideoMetadata,
}

impl VideoUploadRequest {
    pub fn new(page: &ManagedPage, file_name: impl Into<String>, source: Bytes, metadata: VideoMetadata) -> Self {
        Self {
            page_id: page.id.clone(),
            page_access_token: page.access_token.clone(),
            file_name: file_name.into(),
            content_type: "video/mp4".to_string(),
            source,
            metadata,
        }
    }

    /// Read the whole file at `path` into a request
    pub async fn from_file(
        page: &ManagedPage,
        path: impl AsRef<Path>,
        metadata: VideoMetadata,
    ) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());
        Ok(Self::new(page, file_name, Bytes::from(data), metadata))
    }
}

/// 身份认证与页面接口客户端
pub struct IdentityClient {
    config: IdentityConfig,
    transport: Arc<dyn HttpTransport>,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Validate the provider settings and produce a session
    pub fn load(&self) -> Result<IdentitySession, IdentityError> {
        let config = &self.config;

        let fail = |reason: String| {
            error!("Failed to load identity provider: {}", reason);
            Err(IdentityError::LoadFailed { reason })
        };

        if config.app_id.trim().is_empty() {
            return fail("app id is not configured".to_string());
        }
        if !is_valid_api_version(&config.api_version) {
            return fail(format!("invalid API version {}", config.api_version));
        }
        for url in [&config.graph_url, &config.video_url] {
            if !validate_url(url) {
                return fail(format!("invalid Graph URL {}", url));
            }
        }

        info!(app_id = %config.app_id, version = %config.api_version, "Identity provider loaded");

        Ok(IdentitySession {
            app_id: config.app_id.clone(),
            api_version: config.api_version.clone(),
            cookie: config.cookie,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
            video_url: config.video_url.trim_end_matches('/').to_string(),
            scopes: config.scopes.clone(),
            loaded_at: Utc::now(),
        })
    }

    /// Exchange a user access token for an [`AuthResponse`], requiring every configured scope
    pub async fn login(&self, session: &IdentitySession, user_token: &str) -> Result<AuthResponse, IdentityError> {
        let response = self.fetch_me(session, user_token).await.map_err(|e| {
            error!("Login request failed: {}", e);
            e
        })?;

        if !response.is_success() {
            let message = response
                .graph_error_message()
                .unwrap_or_else(|| format!("Graph API returned {}", response.status));
            error!("Login failed: {}", message);
            return Err(IdentityError::Graph { message });
        }

        let me: MeResponse = response.json().map_err(|e| {
            error!("Unreadable login reply: {}", e);
            IdentityError::from(e)
        })?;
        let granted_scopes = me.granted_scopes();
        let missing_scopes = session.missing_scopes(&granted_scopes);

        if !missing_scopes.is_empty() {
            warn!(user_id = %me.id, ?missing_scopes, "Login did not grant every scope");
            return Err(IdentityError::LoginRejected { missing_scopes });
        }

        info!(user_id = %me.id, "User logged in");
        Ok(AuthResponse {
            access_token: user_token.to_string(),
            user_id: me.id,
            granted_scopes,
        })
    }

    /// Current login state for `token`; never fails
    pub async fn login_status(&self, session: &IdentitySession, token: &str) -> LoginStatus {
        let response = match self.fetch_me(session, token).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Login status unknown: {}", e);
                return LoginStatus::Unknown;
            }
        };

        if response.status >= 500 {
            return LoginStatus::Unknown;
        }
        if !response.is_success() {
            return LoginStatus::NotAuthorized;
        }

        match response.json::<MeResponse>() {
            Ok(me) => {
                let granted_scopes = me.granted_scopes();
                if session.missing_scopes(&granted_scopes).is_empty() {
                    LoginStatus::Connected(AuthResponse {
                        access_token: token.to_string(),
                        user_id: me.id,
                        granted_scopes,
                    })
                } else {
                    LoginStatus::NotAuthorized
                }
            }
            Err(_) => LoginStatus::Unknown,
        }
    }

    /// Pages the logged-in user can manage
    pub async fn user_pages(
        &self,
        session: &IdentitySession,
        auth: &AuthResponse,
    ) -> Result<Vec<ManagedPage>, IdentityError> {
        let response = match session.graph_endpoint(&["me", "accounts"]) {
            Ok(url) => {
                let request = HttpRequest::get(url).query(fields::ACCESS_TOKEN, auth.access_token.clone());
                self.transport.execute(request).await
            }
            Err(e) => Err(e),
        };
        let response = response.map_err(|e| {
            error!("Failed to fetch pages: {}", e);
            IdentityError::from(e)
        })?;

        if !response.is_success() {
            let message = response
                .graph_error_message()
                .unwrap_or_else(|| "Failed to fetch pages".to_string());
            error!("Failed to fetch pages: {}", message);
            return Err(IdentityError::Graph { message });
        }

        let pages: GraphList<ManagedPage> = response.json().map_err(|e| {
            error!("Unreadable pages reply: {}", e);
            IdentityError::from(e)
        })?;
        debug!(count = pages.data.len(), "Fetched managed pages");
        Ok(pages.data)
    }

    /// Upload a whole video in one multipart request
    pub async fn upload_video(
        &self,
        session: &IdentitySession,
        request: VideoUploadRequest,
    ) -> Result<VideoUploadResponse, IdentityError> {
        let size = request.source.len();
        let page_id = request.page_id;

        info!(page_id = %page_id, size, "Uploading video");

        let response = match session.videos_endpoint(&page_id) {
            Ok(url) => {
                let http_request = HttpRequest::post(url)
                    .query(fields::ACCESS_TOKEN, request.page_access_token)
                    .file_field(fields::SOURCE, request.file_name, request.content_type, request.source)
                    .text_field(fields::TITLE, request.metadata.title)
                    .text_field(fields::DESCRIPTION, request.metadata.description)
                    .text_field(fields::PRIVACY, request.metadata.privacy.to_graph_param());
                self.transport.execute(http_request).await
            }
            Err(e) => Err(e),
        };
        let response = response.map_err(|e| {
            error!(page_id = %page_id, "Video upload failed: {}", e);
            IdentityError::from(e)
        })?;

        if !response.is_success() {
            let message = response
                .graph_error_message()
                .unwrap_or_else(|| "Upload failed".to_string());
            error!(page_id = %page_id, "Video upload failed: {}", message);
            return Err(IdentityError::Graph { message });
        }

        response.json().map_err(|e| {
            error!(page_id = %page_id, "Unreadable upload reply: {}", e);
            IdentityError::from(e)
        })
    }

    async fn fetch_me(&self, session: &IdentitySession, token: &str) -> Result<HttpResponse, IdentityError> {
        let request = HttpRequest::get(session.graph_endpoint(&["me"])?)
            .query("fields", "id,permissions")
            .query(fields::ACCESS_TOKEN, token);

        Ok(self.transport.execute(request).await?)
    }
}
