// src/models/schedule.rs

//! Cadences and the schedule registration table.
//!
//! Cadences are written as standard five-field cron expressions
//! (`minute hour day-of-month month day-of-week`). The `cron` crate wants a
//! leading seconds field, so five-field input is pinned to second `0`.
//! Five-field day-of-week numbers use the standard numbering (0 or 7 =
//! Sunday) and are rewritten to day names, since the `cron` crate counts
//! 1 = Sunday.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{AppError, Result};
use crate::models::{Config, Location, Target, Topology};

/// A parsed recurring cadence.
#[derive(Debug, Clone)]
pub struct Cadence {
    expression: String,
    schedule: Schedule,
}

impl Cadence {
    /// Parse a five-field cron expression (six or seven fields pass through).
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let normalized = match expression.split_whitespace().count() {
            5 => {
                let fields: Vec<&str> = expression.split_whitespace().collect();
                let day_of_week = standard_day_of_week(fields[4])
                    .map_err(|message| AppError::cadence(expression, message))?;
                format!("0 {} {}", fields[..4].join(" "), day_of_week)
            }
            6 | 7 => expression.to_string(),
            n => {
                return Err(AppError::cadence(
                    expression,
                    format!("expected 5 fields, found {n}"),
                ));
            }
        };
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| AppError::cadence(expression, e))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// The next `count` firings strictly after `after`.
    pub fn upcoming(&self, after: &DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(after).take(count).collect()
    }
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a standard day-of-week field (0-7, 0 and 7 = Sunday) as day names.
///
/// Numeric values, ranges and steps expand to an explicit name list; parts
/// already written with names pass through.
fn standard_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut days: Vec<&str> = Vec::new();
    let mut passthrough: Vec<&str> = Vec::new();

    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{part}'"))?;
                if step == 0 {
                    return Err(format!("zero day-of-week step '{part}'"));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let numeric = |v: &str| v.parse::<u32>().ok();
        let range = if base == "*" {
            step.map(|_| (0, 6))
        } else if let Some((start, end)) = base.split_once('-') {
            numeric(start).zip(numeric(end))
        } else {
            numeric(base).map(|n| (n, if step.is_some() { 6 } else { n }))
        };

        let Some((start, end)) = range else {
            passthrough.push(part);
            continue;
        };
        if start > 7 || end > 7 || start > end {
            return Err(format!("day-of-week '{part}' is outside 0-7"));
        }
        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            let name = DAY_NAMES[(day % 7) as usize];
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    let mut parts: Vec<&str> = days;
    parts.extend(passthrough);
    Ok(parts.join(","))
}

/// One registration: a job name, its cadence, and the targets it fires.
///
/// Every location belongs to exactly one entry, and an entry never fires
/// again before its previous firing finished, so runs of the same location
/// never overlap.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Human-readable name, also the heartbeat key
    pub job_name: String,
    pub cadence: Cadence,
    /// Minute offset within the staggered period, if staggered
    pub offset_minutes: Option<u32>,
    /// Targets fired concurrently on every tick
    pub targets: Vec<Target>,
    /// Targets run once before the first tick
    pub startup: Vec<Target>,
    /// Wait before the startup run
    pub startup_delay: Duration,
}

/// Build the registration table for the configured topology.
pub fn plan_schedule(config: &Config) -> Result<Vec<ScheduleEntry>> {
    let targets = config
        .locations
        .iter()
        .map(|l| config.site.target(l))
        .collect::<Result<Vec<_>>>()?;

    let runs_at_startup = |target: &Target| -> bool {
        config.schedule.run_on_startup
            && config
                .schedule
                .startup_subset
                .as_ref()
                .is_none_or(|subset| subset.iter().any(|id| id == target.id()))
    };

    match config.schedule.topology {
        Topology::FanOut => {
            let cadence = Cadence::parse(&config.schedule.cadence)?;
            let startup = targets.iter().filter(|t| runs_at_startup(t)).cloned().collect();
            Ok(vec![ScheduleEntry {
                job_name: "kiosk-all-locations".to_string(),
                cadence,
                offset_minutes: None,
                targets,
                startup,
                startup_delay: Duration::ZERO,
            }])
        }
        Topology::Staggered => {
            let period = config.schedule.period_minutes;
            let offsets = stagger_offsets(&config.locations, period)?;
            let spacing = Duration::from_secs(config.schedule.startup_spacing_secs);

            let mut entries = Vec::with_capacity(targets.len());
            let mut startup_index = 0u32;
            for (target, offset) in targets.into_iter().zip(offsets) {
                let cadence = Cadence::parse(&staggered_expression(offset, period))?;
                let startup = if runs_at_startup(&target) {
                    vec![target.clone()]
                } else {
                    Vec::new()
                };
                let startup_delay = if startup.is_empty() {
                    Duration::ZERO
                } else {
                    startup_index += 1;
                    spacing * (startup_index - 1)
                };
                entries.push(ScheduleEntry {
                    job_name: format!("kiosk-{}", target.id()),
                    cadence,
                    offset_minutes: Some(offset),
                    targets: vec![target],
                    startup,
                    startup_delay,
                });
            }
            Ok(entries)
        }
    }
}

/// Minute offsets for each location within a staggered period.
///
/// Explicit `offset_minutes` win; the rest are spread evenly
/// (`i * period / n`). Offsets must be below the period and pairwise distinct.
pub fn stagger_offsets(locations: &[Location], period: u32) -> Result<Vec<u32>> {
    if period == 0 || 60 % period != 0 {
        return Err(AppError::config(format!(
            "schedule.period_minutes must divide 60, got {period}"
        )));
    }
    let n = locations.len() as u32;
    if n > period {
        return Err(AppError::config(format!(
            "{n} locations cannot get distinct offsets within a {period}-minute period"
        )));
    }

    let offsets: Vec<u32> = locations
        .iter()
        .enumerate()
        .map(|(i, l)| l.offset_minutes.unwrap_or(i as u32 * period / n.max(1)))
        .collect();

    let mut seen = HashSet::new();
    for (location, offset) in locations.iter().zip(&offsets) {
        if *offset >= period {
            return Err(AppError::config(format!(
                "Offset {offset} for '{}' is outside the {period}-minute period",
                location.id
            )));
        }
        if !seen.insert(*offset) {
            return Err(AppError::config(format!(
                "Offset {offset} for '{}' collides with another location",
                location.id
            )));
        }
    }
    Ok(offsets)
}

/// Five-field expression firing at `offset`, `offset + period`, ... each hour.
pub fn staggered_expression(offset: u32, period: u32) -> String {
    let minutes: Vec<String> = (offset..60)
        .step_by(period.max(1) as usize)
        .map(|m| m.to_string())
        .collect();
    format!("{} * * * *", minutes.join(","))
}
