//! Publish sinks for rendered snapshots.
//!
//! Each snapshot is one object under a deterministic key:
//!
//! ```text
//! {prefix}{location}/index.html
//! ```
//!
//! A publish overwrites the previous snapshot for the same key. Readers only
//! ever see a complete document.

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Environment;
use crate::error::Result;
use crate::models::{PublishSink, PublisherConfig, Target};

pub use local::LocalPublisher;
#[cfg(feature = "s3")]
pub use s3::S3Publisher;

/// One object to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub key: String,
    pub body: String,
    pub content_type: String,
    pub cache_control: String,
}

impl PublishRequest {
    /// Request for a target's snapshot, headers taken from the config.
    pub fn snapshot(target: &Target, body: String, config: &PublisherConfig) -> Self {
        Self {
            key: target.publish_key(&config.key_prefix),
            body,
            content_type: config.content_type.clone(),
            cache_control: config.cache_control.clone(),
        }
    }
}

/// Metadata about a completed publish.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Key as requested
    pub key: String,
    /// Where the object landed (`s3://bucket/key` or a file path)
    pub location: String,
    /// Body size in bytes
    pub bytes: usize,
    /// Timestamp of the write
    pub timestamp: DateTime<Utc>,
}

/// Trait for snapshot sinks.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Store `request.body` under `request.key`, replacing any prior object.
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt>;

    /// Human-readable destination for logs.
    fn describe(&self) -> String;
}

/// Build the configured sink.
pub async fn build_publisher(
    config: &PublisherConfig,
    env: &Environment,
) -> Result<Arc<dyn Publisher>> {
    match config.sink {
        PublishSink::Local => Ok(Arc::new(LocalPublisher::new(&config.local_dir))),
        #[cfg(feature = "s3")]
        PublishSink::S3 => Ok(Arc::new(S3Publisher::from_environment(env).await?)),
        #[cfg(not(feature = "s3"))]
        PublishSink::S3 => {
            let _ = env;
            Err(crate::error::AppError::config(
                "publisher.sink = \"s3\" requires the `s3` feature",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, SiteConfig};

    #[test]
    fn test_snapshot_request() {
        let target = SiteConfig::default()
            .target(&Location {
                id: "hob".into(),
                display_name: "Hob".into(),
                trim_columns: None,
                offset_minutes: None,
            })
            .unwrap();
        let config = PublisherConfig {
            key_prefix: "kiosk/".into(),
            ..PublisherConfig::default()
        };

        let request = PublishRequest::snapshot(&target, "<html></html>".into(), &config);
        assert_eq!(request.key, "kiosk/hob/index.html");
        assert_eq!(request.content_type, "text/html");
        assert_eq!(request.cache_control, "no-cache, no-store, must-revalidate");
    }
}
