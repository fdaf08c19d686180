pub mod transport;
#[cfg(test)]
mod transport_test;
pub mod chunker;
pub mod upload_manager;
pub mod stream_admin;
pub mod status_poller;
#[cfg(test)]
mod status_poller_test;
pub mod identity;
#[cfg(test)]
mod identity_test;
pub mod toast;
pub mod validators;
pub mod config;
pub mod app;
pub mod errors;
pub mod serde_helpers;
pub mod mock_server;
#[cfg(test)]
mod testing;

pub use errors::*;
pub use common::{
    PublishedVideo, StreamQuality, StreamStats, StreamStatusSnapshot, UploadSession, VideoMetadata,
};
