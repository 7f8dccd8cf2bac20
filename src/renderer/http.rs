//! Plain-HTTP rendering backend.
//!
//! Fetches raw markup with reqwest; no script execution. Each context owns
//! its own client, so cookies and connections never cross tasks.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use super::{RenderContext, Renderer, SessionGauge};
use crate::error::{AppError, FetchErrorKind, Result};
use crate::models::FetcherConfig;
use crate::utils::http::create_async_client;

/// Renderer that issues one GET per context.
pub struct HttpRenderer {
    config: FetcherConfig,
    gauge: SessionGauge,
}

impl HttpRenderer {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            gauge: SessionGauge::new(),
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn new_context(&self, label: &str) -> Result<Box<dyn RenderContext>> {
        let client = create_async_client(&self.config)
            .map_err(|e| AppError::fetch(FetchErrorKind::ContextAcquisitionFailed, e))?;
        self.gauge.acquire();
        debug!(task = label, "HTTP context acquired");
        Ok(Box::new(HttpContext {
            client,
            body: None,
            gauge: self.gauge.clone(),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.gauge.live()
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// A single HTTP fetch session.
pub struct HttpContext {
    client: Client,
    body: Option<String>,
    gauge: SessionGauge,
}

impl HttpContext {
    fn loaded(&self) -> Result<&str> {
        self.body
            .as_deref()
            .ok_or_else(|| AppError::fetch(FetchErrorKind::NavigationFailed, "no page loaded"))
    }
}

#[async_trait]
impl RenderContext for HttpContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(classify)?;
        self.body = Some(response.text().await.map_err(classify)?);
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<bool> {
        contains_selector(self.loaded()?, selector)
    }

    async fn content(&mut self) -> Result<String> {
        self.loaded().map(str::to_string)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.gauge.release();
        Ok(())
    }
}

fn classify(error: reqwest::Error) -> AppError {
    let kind = if error.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::NavigationFailed
    };
    AppError::fetch(kind, error)
}

/// Whether `selector` matches anything in `markup`.
pub fn contains_selector(markup: &str, selector: &str) -> Result<bool> {
    let parsed = Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))?;
    let document = Html::parse_document(markup);
    Ok(document.select(&parsed).next().is_some())
}
