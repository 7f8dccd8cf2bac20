// src/pipeline/heartbeat.rs

//! External liveness pings.
//!
//! A schedule entry reports `start` before a firing and `finish` after it.
//! Ping failures are logged and dropped; monitoring must never affect runs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::utils::http::create_ping_client;

/// Liveness hook around each scheduled firing.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn start(&self, job: &str);

    /// `failures` is the number of runs in the firing that did not publish.
    async fn finish(&self, job: &str, failures: usize);
}

/// Heartbeat that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

#[async_trait]
impl Heartbeat for NoopHeartbeat {
    async fn start(&self, _job: &str) {}

    async fn finish(&self, _job: &str, _failures: usize) {}
}

/// Pings `{base}/{job}/start`, then `{base}/{job}` or `{base}/{job}/fail`.
pub struct HttpHeartbeat {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpHeartbeat {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: create_ping_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, job: &str, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) => format!("{}/{}/{}", self.base_url, job, suffix),
            None => format!("{}/{}", self.base_url, job),
        }
    }

    async fn ping(&self, url: String) {
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => debug!(%url, "Heartbeat sent"),
            Err(error) => warn!(%url, %error, "Heartbeat failed"),
        }
    }
}

#[async_trait]
impl Heartbeat for HttpHeartbeat {
    async fn start(&self, job: &str) {
        self.ping(self.url(job, Some("start"))).await;
    }

    async fn finish(&self, job: &str, failures: usize) {
        let suffix = (failures > 0).then_some("fail");
        self.ping(self.url(job, suffix)).await;
    }
}

/// Heartbeat for the given settings; no URL means no pings.
pub fn build_heartbeat(settings: &Settings) -> Result<Arc<dyn Heartbeat>> {
    match settings.heartbeat_url() {
        Some(url) => Ok(Arc::new(HttpHeartbeat::new(
            url,
            settings.environment.heartbeat_api_key.clone(),
            settings.config.heartbeat.timeout_secs,
        )?)),
        None => Ok(Arc::new(NoopHeartbeat)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_success_pings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kiosk-hob/start"))
            .and(header("X-Api-Key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kiosk-hob"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let heartbeat = HttpHeartbeat::new(&format!("{}/", server.uri()), Some("secret".into()), 5)
            .unwrap();
        heartbeat.start("kiosk-hob").await;
        heartbeat.finish("kiosk-hob", 0).await;
    }

    #[tokio::test]
    async fn test_failure_ping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kiosk-all-locations/fail"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let heartbeat = HttpHeartbeat::new(&server.uri(), None, 5).unwrap();
        heartbeat.finish("kiosk-all-locations", 2).await;
    }

    #[tokio::test]
    async fn test_unreachable_monitor_is_harmless() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let heartbeat = HttpHeartbeat::new(&server.uri(), None, 1).unwrap();
        heartbeat.start("kiosk-hob").await;
        heartbeat.finish("kiosk-hob", 0).await;
    }
}
