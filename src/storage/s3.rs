//! AWS S3 publisher.
//!
//! Each snapshot is a single `PutObject` to `s3://{bucket}/{key}`, carrying
//! the configured content type and cache-control header.

use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use tracing::info;

use crate::config::Environment;
use crate::error::{AppError, Result};
use crate::storage::{PublishReceipt, PublishRequest, Publisher};

/// S3-backed publish sink.
pub struct S3Publisher {
    client: Client,
    bucket: String,
}

impl S3Publisher {
    /// Create a new S3 publisher from an existing client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build the client from region, bucket and optional static keys.
    ///
    /// Without static keys the default AWS credential chain applies.
    pub async fn from_environment(env: &Environment) -> Result<Self> {
        let s3 = env.s3()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(s3.region.to_string()));
        if let Some(keys) = &env.credentials {
            loader = loader.credentials_provider(Credentials::new(
                &keys.access_key_id,
                &keys.secret_access_key,
                None,
                None,
                "kiosk-environment",
            ));
        }
        let config = loader.load().await;

        Ok(Self::new(Client::new(&config), s3.bucket))
    }
}

#[async_trait::async_trait]
impl Publisher for S3Publisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt> {
        let bytes = request.body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body.clone().into_bytes()))
            .content_type(&request.content_type)
            .cache_control(&request.cache_control)
            .send()
            .await
            .map_err(|e| AppError::publish(&request.key, DisplayErrorContext(e)))?;

        let location = format!("s3://{}/{}", self.bucket, request.key);
        info!(%location, bytes, "Uploaded snapshot");

        Ok(PublishReceipt {
            key: request.key.clone(),
            location,
            bytes,
            timestamp: Utc::now(),
        })
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
