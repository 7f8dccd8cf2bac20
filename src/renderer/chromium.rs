//! Headless Chromium backend using chromiumoxide.
//!
//! Every context launches its own browser process with a private profile
//! directory, so no cookies, caches or heap survive between tasks. Closing a
//! context shuts that browser down and removes the profile.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{RenderContext, Renderer, SessionGauge};
use crate::error::{AppError, FetchErrorKind, Result};
use crate::models::FetcherConfig;

/// Poll interval while waiting for a structural marker.
const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// How long a closed browser gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("KIOSK_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    executable: Option<PathBuf>,
    user_agent: String,
    request_timeout: Duration,
    gauge: SessionGauge,
    sequence: AtomicU64,
}

impl ChromiumRenderer {
    pub fn new(config: &FetcherConfig) -> Self {
        let executable = config
            .chromium_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(find_chromium);

        Self {
            executable,
            user_agent: config.user_agent.clone(),
            request_timeout: config.navigation_timeout(),
            gauge: SessionGauge::new(),
            sequence: AtomicU64::new(0),
        }
    }

    fn profile_dir(&self, label: &str) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("kiosk-{}-{}-{}", label, std::process::id(), n))
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir)
            .request_timeout(self.request_timeout)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg(format!("--user-agent={}", self.user_agent));

        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(|e| {
            AppError::fetch(
                FetchErrorKind::ContextAcquisitionFailed,
                format!("failed to build browser config: {e}"),
            )
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self, label: &str) -> Result<Box<dyn RenderContext>> {
        let profile_dir = self.profile_dir(label);
        let config = self.browser_config(&profile_dir)?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            AppError::fetch(
                FetchErrorKind::ContextAcquisitionFailed,
                format!("failed to launch Chromium: {e}"),
            )
        })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if let Err(release) = teardown(&mut browser, &handler_task, &profile_dir).await {
                    warn!(task = label, "Browser teardown after failed page creation: {release}");
                }
                return Err(AppError::fetch(
                    FetchErrorKind::ContextAcquisitionFailed,
                    format!("failed to open page: {e}"),
                ));
            }
        };

        self.gauge.acquire();
        debug!(task = label, profile = %profile_dir.display(), "Chromium context acquired");

        Ok(Box::new(ChromiumContext {
            page,
            browser,
            handler_task,
            profile_dir,
            gauge: self.gauge.clone(),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.gauge.live()
    }

    async fn shutdown(&self) -> Result<()> {
        let live = self.gauge.live();
        if live > 0 {
            warn!("Shutting down with {live} Chromium sessions still live");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

/// A single browser process with one page.
pub struct ChromiumContext {
    page: Page,
    browser: Browser,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
    gauge: SessionGauge,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AppError::fetch(FetchErrorKind::NavigationFailed, e))?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<bool> {
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn content(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::fetch(FetchErrorKind::NavigationFailed, e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            page,
            mut browser,
            handler_task,
            profile_dir,
            gauge,
        } = *self;

        // The browser teardown below reclaims the page either way.
        if let Err(e) = page.close().await {
            debug!("Page close failed: {e}");
        }

        teardown(&mut browser, &handler_task, &profile_dir).await?;
        gauge.release();
        Ok(())
    }
}

/// Stop the browser process (kill as fallback) and drop its profile.
async fn teardown(
    browser: &mut Browser,
    handler_task: &JoinHandle<()>,
    profile_dir: &Path,
) -> Result<()> {
    let outcome = match browser.close().await {
        Ok(_) => {
            if exited_within(browser.wait(), EXIT_GRACE).await {
                Ok(())
            } else {
                warn!(
                    grace_secs = EXIT_GRACE.as_secs(),
                    "Browser still running after close, killing it"
                );
                force_kill(browser, "browser did not exit after close".to_string()).await
            }
        }
        Err(close_err) => force_kill(browser, format!("browser close failed ({close_err})")).await,
    };

    handler_task.abort();

    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        debug!(profile = %profile_dir.display(), "Profile cleanup skipped: {e}");
    }
    outcome
}

async fn force_kill(browser: &mut Browser, reason: String) -> Result<()> {
    match browser.kill().await {
        Some(Err(kill_err)) => Err(AppError::release(format!(
            "{reason} and kill failed ({kill_err})"
        ))),
        _ => Ok(()),
    }
}

/// Whether `exit` resolved before `grace` ran out. Errors while waiting count
/// as exited; the process handle is gone either way.
async fn exited_within<F, T, E>(exit: F, grace: Duration) -> bool
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(grace, exit).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Waiting for browser exit failed: {e}");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dirs_are_unique_per_context() {
        let renderer = ChromiumRenderer::new(&FetcherConfig::default());
        let a = renderer.profile_dir("hala");
        let b = renderer.profile_dir("hala");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("kiosk-hala-"));
    }

    #[tokio::test]
    async fn test_hung_exit_is_bounded() {
        let hung = futures::future::pending::<std::io::Result<()>>();
        assert!(!exited_within(hung, Duration::from_millis(20)).await);

        let exited = async { Ok::<_, std::io::Error>(()) };
        assert!(exited_within(exited, Duration::from_millis(20)).await);

        let failed = async { Err::<(), _>(std::io::Error::other("no child")) };
        assert!(exited_within(failed, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_fetch_and_release() {
        let renderer = ChromiumRenderer::new(&FetcherConfig::default());
        let mut ctx = renderer
            .new_context("smoke")
            .await
            .expect("failed to create context");
        assert_eq!(renderer.active_contexts(), 1);

        ctx.navigate("data:text/html,<table class=\"calendar_table\"></table>")
            .await
            .expect("navigation failed");
        assert!(ctx.wait_for_selector("table.calendar_table").await.unwrap());
        assert!(ctx.content().await.unwrap().contains("calendar_table"));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
    }
}
