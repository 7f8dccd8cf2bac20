// src/pipeline/runner.rs

//! Task runner: one fetch → transform → publish for a single location.
//!
//! `run` never fails and never panics outward. Every error (and every panic)
//! inside acquisition, fetch, transform or publish is caught here, logged
//! with the location and phase, and folded into a [`RunReport`]. A session
//! that was acquired is closed on every exit path.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::models::{PublisherConfig, Target};
use crate::renderer::{RenderContext, Renderer};
use crate::services::{PageFetcher, RuleSet, transform};
use crate::storage::{PublishReceipt, PublishRequest, Publisher};
use crate::utils::resident_memory_kb;

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Acquiring,
    Fetching,
    Transforming,
    Publishing,
    Releasing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Acquiring => "acquiring",
            Phase::Fetching => "fetching",
            Phase::Transforming => "transforming",
            Phase::Publishing => "publishing",
            Phase::Releasing => "releasing",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Published(PublishReceipt),
    Failed { phase: Phase, error: String },
}

/// What happened to the rendering session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Acquisition itself failed; nothing to release.
    NotAcquired,
    Released,
    /// Teardown failed; the session may have leaked.
    Failed(String),
}

/// Result of one run, for logs and heartbeats.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub location: String,
    pub outcome: RunOutcome,
    pub release: ReleaseStatus,
    pub elapsed: Duration,
}

impl RunReport {
    /// The snapshot was published. A failed release does not undo that.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Published(_))
    }

    /// Phase the run stopped in, if it failed.
    pub fn failed_phase(&self) -> Option<Phase> {
        match &self.outcome {
            RunOutcome::Failed { phase, .. } => Some(*phase),
            RunOutcome::Published(_) => None,
        }
    }
}

/// Runs the pipeline for one target at a time; shared across all tasks.
pub struct TaskRunner {
    renderer: Arc<dyn Renderer>,
    publisher: Arc<dyn Publisher>,
    rules: RuleSet,
    fetcher: PageFetcher,
    publish: PublisherConfig,
}

impl TaskRunner {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        publisher: Arc<dyn Publisher>,
        rules: RuleSet,
        fetcher: PageFetcher,
        publish: PublisherConfig,
    ) -> Self {
        Self {
            renderer,
            publisher,
            rules,
            fetcher,
            publish,
        }
    }

    /// Sessions acquired but not successfully released, process-wide.
    pub fn active_sessions(&self) -> usize {
        self.renderer.active_contexts()
    }

    /// Run the whole pipeline for `target`. Never fails.
    #[instrument(skip_all, fields(location = %target.id()))]
    pub async fn run(&self, target: &Target) -> RunReport {
        let started = Instant::now();
        info!(
            url = %target.page_url,
            rss_kb = resident_memory_kb(),
            "Starting run"
        );

        let acquired = AssertUnwindSafe(self.renderer.new_context(target.id()))
            .catch_unwind()
            .await;
        let mut session = match acquired {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                let outcome = failed(Phase::Acquiring, e.to_string());
                return self.report(target, started, outcome, ReleaseStatus::NotAcquired);
            }
            Err(panic) => {
                let outcome = failed(Phase::Acquiring, panic_message(panic));
                return self.report(target, started, outcome, ReleaseStatus::NotAcquired);
            }
        };

        let mut phase = Phase::Fetching;
        let driven = AssertUnwindSafe(self.drive(session.as_mut(), target, &mut phase))
            .catch_unwind()
            .await;
        let outcome = match driven {
            Ok(Ok(receipt)) => RunOutcome::Published(receipt),
            Ok(Err(e)) => failed(phase, e.to_string()),
            Err(panic) => failed(phase, panic_message(panic)),
        };

        let release = release(session).await;
        self.report(target, started, outcome, release)
    }

    async fn drive(
        &self,
        session: &mut dyn RenderContext,
        target: &Target,
        phase: &mut Phase,
    ) -> Result<PublishReceipt> {
        *phase = Phase::Fetching;
        let raw = self.fetcher.fetch(session, target.page_url.as_str()).await?;

        *phase = Phase::Transforming;
        let markup = transform::apply(&raw, target, &self.rules)?;
        drop(raw);

        *phase = Phase::Publishing;
        let request = PublishRequest::snapshot(target, markup, &self.publish);
        self.publisher.publish(&request).await
    }

    fn report(
        &self,
        target: &Target,
        started: Instant,
        outcome: RunOutcome,
        release: ReleaseStatus,
    ) -> RunReport {
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match &outcome {
            RunOutcome::Published(receipt) => info!(
                destination = %receipt.location,
                bytes = receipt.bytes,
                elapsed_ms,
                "Published snapshot"
            ),
            RunOutcome::Failed { phase, error } => error!(
                phase = %phase,
                error = %error,
                elapsed_ms,
                "Run failed"
            ),
        }
        info!(
            rss_kb = resident_memory_kb(),
            live_sessions = self.active_sessions(),
            "Run finished"
        );

        RunReport {
            location: target.id().to_string(),
            outcome,
            release,
            elapsed,
        }
    }
}

/// Close the session, catching errors and panics alike.
async fn release(session: Box<dyn RenderContext>) -> ReleaseStatus {
    let closed = AssertUnwindSafe(session.close()).catch_unwind().await;
    let problem = match closed {
        Ok(Ok(())) => return ReleaseStatus::Released,
        Ok(Err(e)) => e.to_string(),
        Err(panic) => panic_message(panic),
    };
    warn!(phase = %Phase::Releasing, error = %problem, "Session release failed");
    ReleaseStatus::Failed(problem)
}

fn failed(phase: Phase, error: String) -> RunOutcome {
    RunOutcome::Failed { phase, error }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown payload".to_string());
    format!("panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ReadySignal;
    use crate::testing::{FailAt, MockPublisher, MockRenderer, target};

    fn runner(renderer: Arc<MockRenderer>, publisher: Arc<MockPublisher>) -> TaskRunner {
        TaskRunner::new(
            renderer,
            publisher,
            RuleSet::calendar(),
            PageFetcher::new(Duration::from_millis(200), ReadySignal::Loaded),
            PublisherConfig::default(),
        )
    }

    async fn run_with(fail: FailAt) -> (RunReport, Arc<MockRenderer>, Arc<MockPublisher>) {
        let renderer = Arc::new(MockRenderer::new(fail));
        let publisher = Arc::new(MockPublisher::new());
        let report = runner(renderer.clone(), publisher.clone())
            .run(&target("hala"))
            .await;
        (report, renderer, publisher)
    }

    #[tokio::test]
    async fn test_successful_run_publishes_transformed_page() {
        let (report, renderer, publisher) = run_with(FailAt::Nothing).await;

        assert!(report.succeeded());
        assert_eq!(report.release, ReleaseStatus::Released);
        assert_eq!(renderer.acquired(), 1);
        assert_eq!(renderer.closed(), 1);
        assert_eq!(renderer.active_contexts(), 0);

        let stored = publisher.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "hala/index.html");
        assert!(stored[0].body.contains("https://hala.example.com/css/site.css"));
        assert!(stored[0].body.contains("hala gym"));
    }

    #[tokio::test]
    async fn test_acquisition_failure_releases_nothing() {
        for fail in [FailAt::Acquire, FailAt::AcquirePanic] {
            let (report, renderer, publisher) = run_with(fail).await;

            assert_eq!(report.failed_phase(), Some(Phase::Acquiring));
            assert_eq!(report.release, ReleaseStatus::NotAcquired);
            assert_eq!(renderer.acquired(), 0);
            assert_eq!(renderer.closed(), 0);
            assert_eq!(publisher.attempts(), 0);
        }
    }

    #[tokio::test]
    async fn test_fetch_failures_release_exactly_once() {
        for fail in [
            FailAt::Navigate,
            FailAt::NavigateHang,
            FailAt::Content,
            FailAt::ContentPanic,
        ] {
            let (report, renderer, publisher) = run_with(fail).await;

            assert_eq!(report.failed_phase(), Some(Phase::Fetching), "{fail:?}");
            assert_eq!(report.release, ReleaseStatus::Released, "{fail:?}");
            assert_eq!(renderer.closed(), 1, "{fail:?}");
            assert_eq!(renderer.acquired(), renderer.closed(), "{fail:?}");
            assert_eq!(renderer.active_contexts(), 0, "{fail:?}");
            assert_eq!(publisher.attempts(), 0, "{fail:?}");
        }
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_reported() {
        let (report, _, _) = run_with(FailAt::NavigateHang).await;
        match report.outcome {
            RunOutcome::Failed { error, .. } => assert!(error.contains("timeout"), "{error}"),
            RunOutcome::Published(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_publish_failure_still_releases() {
        let renderer = Arc::new(MockRenderer::new(FailAt::Nothing));
        let publisher = Arc::new(MockPublisher::failing_times(1));
        let report = runner(renderer.clone(), publisher.clone())
            .run(&target("hala"))
            .await;

        assert_eq!(report.failed_phase(), Some(Phase::Publishing));
        assert_eq!(report.release, ReleaseStatus::Released);
        assert_eq!(renderer.acquired(), 1);
        assert_eq!(renderer.closed(), 1);
        assert_eq!(publisher.attempts(), 1);
    }

    #[tokio::test]
    async fn test_release_failure_is_contained_and_counted() {
        let (report, renderer, publisher) = run_with(FailAt::Release).await;

        assert!(report.succeeded());
        assert!(matches!(report.release, ReleaseStatus::Failed(_)));
        assert_eq!(renderer.closed(), 1);
        assert_eq!(renderer.active_contexts(), 1);
        assert_eq!(publisher.stored().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload), "panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload), "panicked: bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload), "panicked: unknown payload");
    }
}
