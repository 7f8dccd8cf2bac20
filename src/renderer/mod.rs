//! Rendering-context abstraction.
//!
//! A [`Renderer`] hands out disposable [`RenderContext`]s, one per fetch.
//! Contexts are never shared or reused; the caller must `close` every
//! context it acquires.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod http;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FetcherConfig, RendererBackend};

#[cfg(feature = "chromium")]
pub use chromium::ChromiumRenderer;
pub use http::HttpRenderer;

/// A source of isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a fresh context. `label` names the owning task in logs and
    /// temporary paths.
    async fn new_context(&self, label: &str) -> Result<Box<dyn RenderContext>>;

    /// Number of contexts acquired but not yet successfully released.
    fn active_contexts(&self) -> usize;

    /// Release anything the renderer itself holds.
    async fn shutdown(&self) -> Result<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// A single isolated rendering context.
#[async_trait]
pub trait RenderContext: Send {
    /// Load `url` and wait for the page-loaded signal.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Resolve to `true` once `selector` matches. Backends that cannot wait
    /// answer immediately; callers bound the wait.
    async fn wait_for_selector(&mut self, selector: &str) -> Result<bool>;

    /// Serialized markup of the current document.
    async fn content(&mut self) -> Result<String>;

    /// Tear the context down.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Live-context counter shared between a renderer and its contexts.
#[derive(Debug, Clone, Default)]
pub struct SessionGauge(Arc<AtomicUsize>);

impl SessionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the configured renderer.
pub fn build_renderer(config: &FetcherConfig) -> Result<Arc<dyn Renderer>> {
    match config.backend {
        RendererBackend::Http => Ok(Arc::new(HttpRenderer::new(config.clone()))),
        #[cfg(feature = "chromium")]
        RendererBackend::Chromium => Ok(Arc::new(ChromiumRenderer::new(config))),
        #[cfg(not(feature = "chromium"))]
        RendererBackend::Chromium => Err(crate::error::AppError::config(
            "fetcher.backend = \"chromium\" requires the `chromium` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_never_underflows() {
        let gauge = SessionGauge::new();
        gauge.acquire();
        gauge.acquire();
        gauge.release();
        assert_eq!(gauge.live(), 1);
        gauge.release();
        gauge.release();
        assert_eq!(gauge.live(), 0);
    }

    #[test]
    fn gauge_clones_share_count() {
        let gauge = SessionGauge::new();
        let other = gauge.clone();
        other.acquire();
        assert_eq!(gauge.live(), 1);
    }

    #[test]
    fn builds_http_backend() {
        let config = FetcherConfig {
            backend: RendererBackend::Http,
            ..FetcherConfig::default()
        };
        let renderer = build_renderer(&config).unwrap();
        assert_eq!(renderer.name(), "http");
        assert_eq!(renderer.active_contexts(), 0);
    }
}
