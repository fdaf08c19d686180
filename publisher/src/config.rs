use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::errors::PublisherError;
use crate::identity::{is_valid_api_version, IdentityConfig, DEFAULT_API_VERSION, DEFAULT_SCOPES};
use crate::status_poller::DEFAULT_POLL_INTERVAL;
use crate::stream_admin::StreamAdminConfig;
use crate::toast::DEFAULT_DISPLAY_DURATION;
use crate::transport::TransportOptions;
use crate::upload_manager::UploadConfig;
use crate::validators::validate_url;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Streaming server admin API
    pub admin: AdminConfig,

    /// Graph API identity and upload endpoints
    pub graph: GraphConfig,

    /// Chunked upload settings
    pub upload: UploadSettings,

    /// Stream status polling
    pub polling: PollingConfig,

    /// Toast notifications
    pub notifications: NotificationConfig,

    /// HTTP client settings
    pub transport: TransportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Base URL of the streaming server, with or without a trailing `/admin`
    pub base_url: String,

    pub username: String,

    pub password: String,

    /// Stream used by `watch` and `info` when none is given
    pub default_stream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    pub app_id: String,

    /// Graph API version, e.g. `v18.0`
    pub api_version: String,

    pub graph_url: String,

    /// Host used for video uploads
    pub video_url: String,

    pub cookie: bool,

    /// Permissions a login must grant
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    /// Chunk size in bytes
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between status polls
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// How long a toast stays visible
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub display_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub request_timeout: Duration,

    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Include module targets in log lines
    pub show_target: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            default_stream: None,
        }
    }
}

impl Default for GraphConfig {
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

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            display_duration: DEFAULT_DISPLAY_DURATION,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        let defaults = TransportOptions::default();
        Self {
            request_timeout: defaults.request_timeout,
            user_agent: defaults.user_agent,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
        }
    }
}

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file, writing the defaults if it does not exist
    pub async fn load(&mut self) -> Result<(), PublisherError> {
        if !tokio::fs::try_exists(&self.config_path).await.unwrap_or(false) {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| PublisherError::configuration(format!("Failed to read config file: {}", e)))?;

        self.config = toml::from_str(&content)
            .map_err(|e| PublisherError::configuration(format!("Failed to parse config file: {}", e)))?;

        self.validate()?;
        Ok(())
    }

    pub async fn save(&self) -> Result<(), PublisherError> {
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| PublisherError::configuration(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PublisherError::configuration(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|e| PublisherError::configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn update_config(&mut self, config: AppConfig) -> Result<(), PublisherError> {
        Self::validate_config(&config)?;
        self.config = config;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PublisherError> {
        Self::validate_config(&self.config)
    }

    pub fn validate_config(config: &AppConfig) -> Result<(), PublisherError> {
        if !validate_url(&config.admin.base_url) {
            return Err(PublisherError::configuration(format!(
                "Invalid streaming server URL: {}",
                config.admin.base_url
            )));
        }

        if !is_valid_api_version(&config.graph.api_version) {
            return Err(PublisherError::configuration(format!(
                "Graph API version must look like v18.0, got {}",
                config.graph.api_version
            )));
        }

        for (name, url) in [("graph_url", &config.graph.graph_url), ("video_url", &config.graph.video_url)] {
            if !validate_url(url) {
                return Err(PublisherError::configuration(format!("Invalid {}: {}", name, url)));
            }
        }

        if config.upload.chunk_size == 0 {
            return Err(PublisherError::configuration("Chunk size must be greater than 0"));
        }

        if config.polling.interval.is_zero() {
            return Err(PublisherError::configuration("Polling interval must be greater than 0"));
        }

        if config.notifications.display_duration.is_zero() {
            return Err(PublisherError::configuration("Toast display duration must be greater than 0"));
        }

        if config.transport.request_timeout.is_zero() {
            return Err(PublisherError::configuration("Request timeout must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
            return Err(PublisherError::configuration(format!(
                "Unknown log level: {}",
                config.logging.level
            )));
        }

        Ok(())
    }

    pub fn to_upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.config.upload.chunk_size,
        }
    }

    pub fn to_stream_admin_config(&self) -> StreamAdminConfig {
        StreamAdminConfig {
            base_url: self.config.admin.base_url.clone(),
            username: self.config.admin.username.clone(),
            password: self.config.admin.password.clone(),
        }
    }

    pub fn to_identity_config(&self) -> IdentityConfig {
        let graph = &self.config.graph;
        IdentityConfig {
            app_id: graph.app_id.clone(),
            api_version: graph.api_version.clone(),
            graph_url: graph.graph_url.clone(),
            video_url: graph.video_url.clone(),
            cookie: graph.cookie,
            scopes: graph.scopes.clone(),
        }
    }

    pub fn to_transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: self.config.transport.request_timeout,
            user_agent: self.config.transport.user_agent.clone(),
        }
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    pub const PREFIX: &'static str = "STREAM_PUBLISHER_";

    /// Apply `STREAM_PUBLISHER_*` environment variables to the configuration
    pub fn apply_overrides(config: &mut AppConfig) {
        Self::apply_from(config, |name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", Self::PREFIX, suffix));

        // Admin overrides
        if let Some(url) = var("ADMIN_URL") {
            config.admin.base_url = url;
        }
        if let Some(username) = var("ADMIN_USERNAME") {
            config.admin.username = username;
        }
        if let Some(password) = var("ADMIN_PASSWORD") {
            config.admin.password = password;
        }

        // Graph overrides
        if let Some(app_id) = var("APP_ID") {
            config.graph.app_id = app_id;
        }
        if let Some(version) = var("API_VERSION") {
            config.graph.api_version = version;
        }

        if let Some(size) = var("CHUNK_SIZE").and_then(|v| v.parse::<u64>().ok()) {
            config.upload.chunk_size = size;
        }
        if let Some(ms) = var("POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.polling.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = var("REQUEST_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.transport.request_timeout = Duration::from_millis(ms);
        }

        // Logging overrides
        if let Some(level) = var("LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
