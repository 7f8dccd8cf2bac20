// src/pipeline/scheduler.rs

//! Recurring scheduler.
//!
//! Each [`ScheduleEntry`] gets its own loop: optional startup run, then wait
//! for the next cadence tick, fire all of the entry's targets concurrently,
//! repeat. A loop awaits its firing before computing the next tick, so a
//! location never runs twice at once; ticks that pass during a long firing
//! are skipped, not queued.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{ScheduleEntry, Target};
use crate::pipeline::{Heartbeat, RunReport, TaskRunner};

/// Upper bound when counting skipped ticks.
const MAX_SKIPPED_TICKS: usize = 1_000;

/// Outcome of one firing of one entry.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub job_name: String,
    pub runs: Vec<RunReport>,
    /// Sessions still held after the firing
    pub live_sessions: usize,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.runs.iter().filter(|r| !r.succeeded()).count()
    }
}

pub struct Scheduler {
    runner: Arc<TaskRunner>,
    heartbeat: Arc<dyn Heartbeat>,
    entries: Vec<ScheduleEntry>,
    leak_threshold: usize,
}

impl Scheduler {
    pub fn new(runner: Arc<TaskRunner>, heartbeat: Arc<dyn Heartbeat>) -> Self {
        Self {
            runner,
            heartbeat,
            entries: Vec::new(),
            leak_threshold: usize::MAX,
        }
    }

    /// Warn when more than `threshold` sessions are live after a firing.
    pub fn with_leak_threshold(mut self, threshold: usize) -> Self {
        self.leak_threshold = threshold;
        self
    }

    pub fn register(&mut self, entry: ScheduleEntry) {
        info!(
            job = %entry.job_name,
            cadence = entry.cadence.expression(),
            targets = entry.targets.len(),
            "Registered schedule entry"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Run `targets` concurrently as one firing of `entry`.
    ///
    /// Failed runs are counted, never propagated; siblings always complete.
    pub async fn fire(&self, entry: &ScheduleEntry, targets: &[Target]) -> CycleReport {
        let job = entry.job_name.as_str();
        self.heartbeat.start(job).await;

        let runs = join_all(targets.iter().map(|t| self.runner.run(t))).await;
        let report = CycleReport {
            job_name: job.to_string(),
            runs,
            live_sessions: self.runner.active_sessions(),
        };

        let failures = report.failures();
        self.heartbeat.finish(job, failures).await;

        if failures > 0 {
            let failed: Vec<&str> = report
                .runs
                .iter()
                .filter(|r| !r.succeeded())
                .map(|r| r.location.as_str())
                .collect();
            warn!(job, failures, ?failed, "Firing finished with failures");
        } else {
            info!(job, runs = report.runs.len(), "Firing finished");
        }
        if report.live_sessions > self.leak_threshold {
            warn!(
                job,
                live_sessions = report.live_sessions,
                threshold = self.leak_threshold,
                "Rendering sessions are accumulating; releases may be failing"
            );
        }

        report
    }

    /// Drive every entry until the returned future is dropped.
    pub async fn run(self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(AppError::config("Nothing to schedule"));
        }

        let scheduler = Arc::new(self);
        let mut loops = JoinSet::new();
        for index in 0..scheduler.entries.len() {
            loops.spawn(Arc::clone(&scheduler).drive(index));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Schedule loop stopped: {}", e);
            }
        }
        Ok(())
    }

    async fn drive(self: Arc<Self>, index: usize) {
        let entry = &self.entries[index];
        let job = entry.job_name.as_str();

        if !entry.startup.is_empty() {
            if !entry.startup_delay.is_zero() {
                tokio::time::sleep(entry.startup_delay).await;
            }
            info!(job, "Startup run");
            self.fire(entry, &entry.startup).await;
        }

        loop {
            let now = Utc::now();
            let Some(next) = entry.cadence.next_after(&now) else {
                warn!(job, "Cadence has no future ticks; loop ends");
                return;
            };
            debug!(job, next = %next, "Waiting for next tick");
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            self.fire(entry, &entry.targets).await;

            let finished = Utc::now();
            let mut skipped = 0;
            let mut tick = next;
            while let Some(following) = entry.cadence.next_after(&tick) {
                if following > finished || skipped >= MAX_SKIPPED_TICKS {
                    break;
                }
                skipped += 1;
                tick = following;
            }
            if skipped > 0 {
                warn!(job, skipped, "Firing outlasted its period; ticks skipped");
            }
        }
    }
}
