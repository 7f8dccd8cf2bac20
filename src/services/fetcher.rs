// src/services/fetcher.rs

//! Page fetcher.
//!
//! Drives one already-acquired [`RenderContext`]: navigate under a hard
//! deadline, wait (softly) for the calendar markup, read the document.
//! Acquisition and release belong to the caller.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{AppError, FetchErrorKind, Result};
use crate::models::FetcherConfig;
use crate::renderer::RenderContext;

/// What "the page is ready" means after navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySignal {
    /// Navigation completing is enough.
    Loaded,
    /// Also wait up to `timeout` for `selector` to appear.
    Selector { selector: String, timeout: Duration },
}

impl ReadySignal {
    pub fn from_config(config: &FetcherConfig) -> Self {
        let selector = config.ready_selector.trim();
        if selector.is_empty() {
            Self::Loaded
        } else {
            Self::Selector {
                selector: selector.to_string(),
                timeout: config.ready_timeout(),
            }
        }
    }
}

/// Fetches the rendered markup of one page through a render context.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    navigation_timeout: Duration,
    ready: ReadySignal,
}

impl PageFetcher {
    pub fn new(navigation_timeout: Duration, ready: ReadySignal) -> Self {
        Self {
            navigation_timeout,
            ready,
        }
    }

    pub fn from_config(config: &FetcherConfig) -> Self {
        Self::new(config.navigation_timeout(), ReadySignal::from_config(config))
    }

    /// Navigate `session` to `url` and return the document markup.
    ///
    /// Navigation past the deadline fails with [`FetchErrorKind::Timeout`].
    /// A ready selector that never appears only logs a warning; the page is
    /// read as-is.
    pub async fn fetch(&self, session: &mut dyn RenderContext, url: &str) -> Result<String> {
        match timeout(self.navigation_timeout, session.navigate(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::fetch(
                    FetchErrorKind::Timeout,
                    format!(
                        "navigation to {url} exceeded {}s",
                        self.navigation_timeout.as_secs()
                    ),
                ));
            }
        }

        if let ReadySignal::Selector {
            selector,
            timeout: wait,
        } = &self.ready
        {
            match timeout(*wait, session.wait_for_selector(selector)).await {
                Ok(Ok(true)) => debug!(url, selector = %selector, "Ready selector present"),
                Ok(Ok(false)) => {
                    warn!(url, selector = %selector, "Ready selector absent, reading page as-is")
                }
                Ok(Err(error)) => {
                    warn!(url, selector = %selector, %error, "Ready check failed, reading page as-is")
                }
                Err(_) => warn!(
                    url,
                    selector = %selector,
                    wait_secs = wait.as_secs(),
                    "Ready selector did not appear in time, reading page as-is"
                ),
            }
        }

        session.content().await
    }
}
