// src/testing.rs

//! In-memory renderer, publisher and heartbeat doubles for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, FetchErrorKind, Result};
use crate::models::{Location, SiteConfig, Target};
use crate::pipeline::Heartbeat;
use crate::renderer::{RenderContext, Renderer, SessionGauge};
use crate::storage::{PublishReceipt, PublishRequest, Publisher};

/// Target for `id` under `https://{id}.example.com/calendar`.
pub fn target(id: &str) -> Target {
    let site = SiteConfig {
        scheme: "https".into(),
        domain: "example.com".into(),
        path: "/calendar".into(),
    };
    site.target(&Location {
        id: id.into(),
        display_name: format!("{id} gym"),
        trim_columns: None,
        offset_minutes: None,
    })
    .unwrap()
}

/// Where a mock context misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nothing,
    Acquire,
    AcquirePanic,
    Navigate,
    NavigateHang,
    ReadyNever,
    Content,
    ContentPanic,
    Release,
}

pub struct MockRenderer {
    default: FailAt,
    overrides: HashMap<String, FailAt>,
    gauge: SessionGauge,
    acquired: AtomicUsize,
    closed: Arc<AtomicUsize>,
    attempts: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn new(default: FailAt) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            gauge: SessionGauge::new(),
            acquired: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Misbehave at `at` only for contexts labelled `label`.
    pub fn failing(mut self, label: &str, at: FailAt) -> Self {
        self.overrides.insert(label.to_string(), at);
        self
    }

    /// Contexts handed out.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// `close` calls, successful or not.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Acquisition attempts for one label, including failed ones.
    pub fn attempts_for(&self, label: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|l| *l == label)
            .count()
    }

    fn fail_at(&self, label: &str) -> FailAt {
        self.overrides.get(label).copied().unwrap_or(self.default)
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn new_context(&self, label: &str) -> Result<Box<dyn RenderContext>> {
        self.attempts.lock().unwrap().push(label.to_string());
        let fail = self.fail_at(label);
        match fail {
            FailAt::Acquire => {
                return Err(AppError::fetch(
                    FetchErrorKind::ContextAcquisitionFailed,
                    "no browser",
                ));
            }
            FailAt::AcquirePanic => panic!("browser launch blew up for {label}"),
            _ => {}
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.gauge.acquire();
        Ok(Box::new(MockContext {
            label: label.to_string(),
            fail,
            gauge: self.gauge.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.gauge.live()
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockContext {
    label: String,
    fail: FailAt,
    gauge: SessionGauge,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for MockContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        match self.fail {
            FailAt::Navigate => Err(AppError::fetch(
                FetchErrorKind::NavigationFailed,
                format!("{url} refused"),
            )),
            FailAt::NavigateHang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn wait_for_selector(&mut self, _selector: &str) -> Result<bool> {
        if self.fail == FailAt::ReadyNever {
            futures::future::pending::<()>().await;
        }
        Ok(true)
    }

    async fn content(&mut self) -> Result<String> {
        match self.fail {
            FailAt::Content => Err(AppError::fetch(
                FetchErrorKind::NavigationFailed,
                "page crashed",
            )),
            FailAt::ContentPanic => panic!("content extraction blew up for {}", self.label),
            _ => Ok(format!(
                r#"<html><head><link href="/css/site.css"></head><body>
                <div id="widecontainer"><div id="innercontainer">
                <table class="calendar_table"><tr><td>{}</td><td>a</td><td>b</td></tr></table>
                </div></div></body></html>"#,
                self.label
            )),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail == FailAt::Release {
            return Err(AppError::release("browser would not exit"));
        }
        self.gauge.release();
        Ok(())
    }
}

/// Publisher that records requests and can fail its first `n` calls.
#[derive(Default)]
pub struct MockPublisher {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    stored: Mutex<Vec<PublishRequest>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<PublishRequest> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::publish(&request.key, "bucket unavailable"));
        }

        let receipt = PublishReceipt {
            key: request.key.clone(),
            location: format!("mem://{}", request.key),
            bytes: request.body.len(),
            timestamp: Utc::now(),
        };
        self.stored.lock().unwrap().push(request.clone());
        Ok(receipt)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Heartbeat that records `start:{job}` and `finish:{job}:{failures}`.
#[derive(Default)]
pub struct RecordingHeartbeat {
    events: Mutex<Vec<String>>,
}

impl RecordingHeartbeat {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Heartbeat for RecordingHeartbeat {
    async fn start(&self, job: &str) {
        self.events.lock().unwrap().push(format!("start:{job}"));
    }

    async fn finish(&self, job: &str, failures: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish:{job}:{failures}"));
    }
}
