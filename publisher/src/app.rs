use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use common::{AuthResponse, IdentityError, LoginStatus, ManagedPage, PublishedVideo, VideoMetadata, VideoUploadResponse};

use crate::chunker::FileSource;
use crate::config::{AppConfig, ConfigManager, EnvConfigOverride, LoggingConfig};
use crate::errors::PublisherError;
use crate::identity::{IdentityClient, IdentitySession, VideoUploadRequest};
use crate::status_poller::{StatusPoller, StreamStatsSource};
use crate::stream_admin::StreamAdminClient;
use crate::toast::ToastNotifier;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::upload_manager::{EventHandler, LoggingEventHandler, UploadEndpoint, UploadSessionClient, UploadTarget};

pub const DEFAULT_CONFIG_FILE: &str = "stream_publisher.toml";

/// Install the global tracing subscriber. Returns false if one was already set.
pub fn init_logging(logging: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_ascii_lowercase()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(logging.show_target))
        .try_init()
        .is_ok()
}

/// Application builder for dependency injection and initialization
pub struct AppBuilder {
    config_path: Option<PathBuf>,
    custom_config: Option<AppConfig>,
    custom_transport: Option<Arc<dyn HttpTransport>>,
    event_handlers: Vec<Arc<dyn EventHandler>>,
    enable_env_overrides: bool,
    enable_logging: bool,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config_path: None,
            custom_config: None,
            custom_transport: None,
            event_handlers: Vec::new(),
            enable_env_overrides: true,
            enable_logging: true,
        }
    }

    /// Set configuration file path
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Set custom configuration
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.custom_config = Some(config);
        self
    }

    /// Set custom HTTP transport implementation
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.custom_transport = Some(transport);
        self
    }

    /// Add an upload event handler
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Enable or disable environment variable overrides
    pub fn with_env_overrides(mut self, enable: bool) -> Self {
        self.enable_env_overrides = enable;
        self
    }

    /// Enable or disable global logging initialization
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    pub async fn build(self) -> Result<PublisherApp, PublisherError> {
        let config = self.load_configuration().await?;

        if self.enable_logging && !init_logging(&config.logging) {
            debug!("Global logger already installed");
        }

        info!("Initializing stream publisher");

        let manager = {
            let mut manager = ConfigManager::new(PathBuf::new());
            manager.update_config(config)?;
            manager
        };

        let transport: Arc<dyn HttpTransport> = match self.custom_transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&manager.to_transport_options())?),
        };

        let stream_admin = Arc::new(StreamAdminClient::new(
            &manager.to_stream_admin_config(),
            Arc::clone(&transport),
        )?);

        let graph = &manager.get_config().graph;
        let uploader = UploadSessionClient::new(
            manager.to_upload_config(),
            UploadEndpoint::new(graph.video_url.clone(), graph.api_version.clone()),
            Arc::clone(&transport),
        );

        for handler in &self.event_handlers {
            uploader.add_event_handler(Arc::clone(handler)).await;
        }
        if self.event_handlers.is_empty() {
            uploader.add_event_handler(Arc::new(LoggingEventHandler)).await;
        }

        let identity = IdentityClient::new(manager.to_identity_config(), Arc::clone(&transport));
        let config = manager.get_config().clone();

        info!(admin = %stream_admin.base_url(), "Stream publisher initialized");

        Ok(PublisherApp {
            status_poller: StatusPoller::new(config.polling.interval),
            toasts: ToastNotifier::new(config.notifications.display_duration),
            config,
            stream_admin,
            uploader,
            identity,
            identity_session: RwLock::new(None),
        })
    }

    async fn load_configuration(&self) -> Result<AppConfig, PublisherError> {
        let mut config = if let Some(custom_config) = &self.custom_config {
            custom_config.clone()
        } else {
            let config_path = self
                .config_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            let mut config_manager = ConfigManager::new(config_path);
            config_manager.load().await?;
            config_manager.get_config().clone()
        };

        if self.enable_env_overrides {
            EnvConfigOverride::apply_overrides(&mut config);
        }

        Ok(config)
    }
}

/// Wired set of clients sharing one transport and configuration
pub struct PublisherApp {
    config: AppConfig,
    stream_admin: Arc<StreamAdminClient>,
    uploader: UploadSessionClient,
    identity: IdentityClient,
    identity_session: RwLock<Option<IdentitySession>>,
    status_poller: StatusPoller,
    toasts: ToastNotifier,
}

impl PublisherApp {
    pub async fn with_config_file(config_path: PathBuf) -> Result<Self, PublisherError> {
        AppBuilder::new().with_config_path(config_path).build().await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self, PublisherError> {
        AppBuilder::new().with_config(config).build().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stream_admin(&self) -> &StreamAdminClient {
        &self.stream_admin
    }

    pub fn uploader(&self) -> &UploadSessionClient {
        &self.uploader
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    pub fn status_poller(&self) -> &StatusPoller {
        &self.status_poller
    }

    pub fn toasts(&self) -> &ToastNotifier {
        &self.toasts
    }

    /// Load the identity provider once; later calls return the same session
    pub async fn load_identity(&self) -> Result<IdentitySession, PublisherError> {
        let mut session = self.identity_session.write().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.clone());
        }

        let loaded = self.identity.load()?;
        *session = Some(loaded.clone());
        Ok(loaded)
    }

    pub async fn identity_session(&self) -> Result<IdentitySession, IdentityError> {
        self.identity_session
            .read()
            .await
            .clone()
            .ok_or(IdentityError::NotInitialized)
    }

    pub async fn login(&self, user_token: &str) -> Result<AuthResponse, PublisherError> {
        let session = self.identity_session().await?;
        Ok(self.identity.login(&session, user_token).await?)
    }

    pub async fn login_status(&self, token: &str) -> Result<LoginStatus, PublisherError> {
        let session = self.identity_session().await?;
        Ok(self.identity.login_status(&session, token).await)
    }

    pub async fn user_pages(&self, auth: &AuthResponse) -> Result<Vec<ManagedPage>, PublisherError> {
        let session = self.identity_session().await?;
        Ok(self.identity.user_pages(&session, auth).await?)
    }

    /// Single-shot upload of a small video
    pub async fn upload_video(&self, request: VideoUploadRequest) -> Result<VideoUploadResponse, PublisherError> {
        let session = self.identity_session().await?;
        Ok(self.identity.upload_video(&session, request).await?)
    }

    /// Chunked upload of a file on disk to `page`
    pub async fn upload_file(
        &self,
        path: &Path,
        page: &ManagedPage,
        metadata: &VideoMetadata,
    ) -> Result<PublishedVideo, PublisherError> {
        let source = FileSource::open(path).await?;
        let target = UploadTarget::new(page.id.clone(), page.access_token.clone());
        Ok(self.uploader.upload(&source, &target, metadata).await?)
    }

    /// Begin polling the status of `stream`
    pub async fn start_watching(&self, stream: &str) -> bool {
        let source: Arc<dyn StreamStatsSource> = self.stream_admin.clone();
        self.status_poller.start(source, stream).await
    }

    pub async fn stop_watching(&self) -> bool {
        self.status_poller.stop().await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down stream publisher");
        self.status_poller.stop().await;
        self.toasts.dismiss().await;
    }
}
