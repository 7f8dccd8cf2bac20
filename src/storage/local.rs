//! Local filesystem publisher.
//!
//! Writes snapshots beneath a root directory, mirroring the object key
//! layout. Useful for development and for serving from a plain web server.
//!
//! ```text
//! {root}/
//! ├── dubrava/
//! │   └── index.html
//! └── zonar/
//!     └── index.html
//! ```

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::storage::{PublishReceipt, PublishRequest, Publisher};

/// Local filesystem publish sink.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    root_dir: PathBuf,
}

impl LocalPublisher {
    /// Create a new LocalPublisher rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Resolve a key to a path, refusing anything that escapes the root.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(AppError::publish(key, "key must be a relative path"));
        }
        Ok(self.root_dir.join(relative))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt> {
        let path = self.path(&request.key)?;
        self.write_bytes(&path, request.body.as_bytes())
            .await
            .map_err(|e| AppError::publish(&request.key, e))?;

        debug!(path = %path.display(), bytes = request.body.len(), "Snapshot written");
        Ok(PublishReceipt {
            key: request.key.clone(),
            location: path.display().to_string(),
            bytes: request.body.len(),
            timestamp: Utc::now(),
        })
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(key: &str, body: &str) -> PublishRequest {
        PublishRequest {
            key: key.into(),
            body: body.into(),
            content_type: "text/html".into(),
            cache_control: "no-cache".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_writes_file() {
        let tmp = TempDir::new().unwrap();
        let publisher = LocalPublisher::new(tmp.path());

        let receipt = publisher
            .publish(&request("dubrava/index.html", "<html></html>"))
            .await
            .unwrap();

        assert_eq!(receipt.bytes, 13);
        let written = std::fs::read_to_string(tmp.path().join("dubrava/index.html")).unwrap();
        assert_eq!(written, "<html></html>");
        assert!(!tmp.path().join("dubrava/index.tmp").exists());
    }

    #[tokio::test]
    async fn test_publish_overwrites() {
        let tmp = TempDir::new().unwrap();
        let publisher = LocalPublisher::new(tmp.path());

        publisher.publish(&request("hob/index.html", "old")).await.unwrap();
        publisher.publish(&request("hob/index.html", "new")).await.unwrap();

        let written = std::fs::read_to_string(tmp.path().join("hob/index.html")).unwrap();
        assert_eq!(written, "new");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let publisher = LocalPublisher::new(tmp.path());

        for key in ["../outside.html", "/etc/passwd", "a/../../b", ""] {
            let result = publisher.publish(&request(key, "x")).await;
            assert!(matches!(result, Err(AppError::Publish { .. })), "{key}");
        }
    }
}
