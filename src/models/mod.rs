// src/models/mod.rs

//! Domain models for the kiosk publisher.
//!
//! Plain data only: configuration, task identities and the schedule table.

mod config;
mod location;
mod schedule;

// Re-export all public types
pub use config::{
    Config, FetcherConfig, HeartbeatConfig, PublishSink, PublisherConfig, RendererBackend,
    ScheduleConfig, SiteConfig, Topology,
};
pub use location::{Location, Target};
pub use schedule::{Cadence, ScheduleEntry, plan_schedule, stagger_offsets, staggered_expression};
