//! Fetch and transform services.
//!
//! - Page fetching through a render context (`PageFetcher`)
//! - The declarative rule table (`RuleSet`)
//! - Rule application over parsed markup (`transform::apply`)

mod fetcher;
pub mod rules;
pub mod transform;

pub use fetcher::{PageFetcher, ReadySignal};
pub use rules::{Rule, RuleSet, Stage, TextMatch};
