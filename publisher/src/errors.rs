use thiserror::Error;

pub use common::error::{AdminError, IdentityError, RequestFailure, TransportError, UploadError};

/// Top-level error for the application layer
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Stream admin error: {0}")]
    Admin(#[from] AdminError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublisherError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PublisherError::Configuration {
            message: message.into(),
        }
    }
}
