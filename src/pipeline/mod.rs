//! Run orchestration.
//!
//! - `TaskRunner`: one contained fetch → transform → publish run
//! - `Scheduler`: recurring firings of the schedule entries
//! - `Heartbeat`: optional external liveness pings

pub mod heartbeat;
pub mod runner;
pub mod scheduler;

pub use heartbeat::{Heartbeat, HttpHeartbeat, NoopHeartbeat, build_heartbeat};
pub use runner::{Phase, ReleaseStatus, RunOutcome, RunReport, TaskRunner};
pub use scheduler::{CycleReport, Scheduler};
