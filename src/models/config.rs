//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::Location;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where calendar pages live
    #[serde(default)]
    pub site: SiteConfig,

    /// Rendering backend and fetch bounds
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Publish sink settings
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Cadence topology and startup behavior
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// External liveness monitor
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Task identities, one per mirrored location
    #[serde(default = "defaults::locations")]
    pub locations: Vec<Location>,

    /// Optional TOML rule table replacing the built-in calendar rules
    #[serde(default)]
    pub rules_file: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    ///
    /// Cadence and rule checks live with their own types; see
    /// [`crate::models::plan_schedule`] and [`crate::services::RuleSet::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.site.domain.trim().is_empty() {
            return Err(AppError::config("site.domain is empty"));
        }
        if !matches!(self.site.scheme.as_str(), "http" | "https") {
            return Err(AppError::config(format!(
                "site.scheme must be http or https, got '{}'",
                self.site.scheme
            )));
        }
        if self.fetcher.navigation_timeout_secs == 0 {
            return Err(AppError::config("fetcher.navigation_timeout_secs must be > 0"));
        }
        if self.fetcher.ready_timeout_secs == 0 {
            return Err(AppError::config("fetcher.ready_timeout_secs must be > 0"));
        }
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::config("fetcher.user_agent is empty"));
        }
        if self.locations.is_empty() {
            return Err(AppError::config("No locations defined"));
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            location.validate()?;
            if !seen.insert(location.id.as_str()) {
                return Err(AppError::config(format!(
                    "Duplicate location id '{}'",
                    location.id
                )));
            }
        }

        if let Some(subset) = &self.schedule.startup_subset {
            for id in subset {
                if !seen.contains(id.as_str()) {
                    return Err(AppError::config(format!(
                        "schedule.startup_subset names unknown location '{id}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a location by id.
    pub fn location(&self, id: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            fetcher: FetcherConfig::default(),
            publisher: PublisherConfig::default(),
            schedule: ScheduleConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            locations: defaults::locations(),
            rules_file: None,
        }
    }
}

/// Target site layout: `{scheme}://{location}.{domain}{path}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "defaults::scheme")]
    pub scheme: String,

    #[serde(default = "defaults::domain")]
    pub domain: String,

    /// Path of the calendar page on each location host
    #[serde(default = "defaults::path")]
    pub path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            scheme: defaults::scheme(),
            domain: defaults::domain(),
            path: defaults::path(),
        }
    }
}

/// Which rendering backend acquires fetch sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RendererBackend {
    /// Headless Chromium, one browser process per session
    Chromium,
    /// Plain HTTP GET, one client per session
    Http,
}

/// Fetch bounds and rendering backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "defaults::backend")]
    pub backend: RendererBackend,

    /// Hard bound on navigation, in seconds
    #[serde(default = "defaults::navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Structural marker to wait for; empty means "page loaded" only
    #[serde(default = "defaults::ready_selector")]
    pub ready_selector: String,

    /// Soft bound on the structural wait, in seconds
    #[serde(default = "defaults::ready_timeout")]
    pub ready_timeout_secs: u64,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Explicit Chromium executable; autodetected when unset
    #[serde(default)]
    pub chromium_path: Option<String>,
}

impl FetcherConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            backend: defaults::backend(),
            navigation_timeout_secs: defaults::navigation_timeout(),
            ready_selector: defaults::ready_selector(),
            ready_timeout_secs: defaults::ready_timeout(),
            user_agent: defaults::user_agent(),
            chromium_path: None,
        }
    }
}

/// Which sink receives rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishSink {
    S3,
    Local,
}

/// Publish sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "defaults::sink")]
    pub sink: PublishSink,

    /// Root directory for the local sink
    #[serde(default = "defaults::local_dir")]
    pub local_dir: String,

    /// Prefix prepended to every key (e.g. "kiosk/")
    #[serde(default)]
    pub key_prefix: String,

    #[serde(default = "defaults::content_type")]
    pub content_type: String,

    #[serde(default = "defaults::cache_control")]
    pub cache_control: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sink: defaults::sink(),
            local_dir: defaults::local_dir(),
            key_prefix: String::new(),
            content_type: defaults::content_type(),
            cache_control: defaults::cache_control(),
        }
    }
}

/// How cadences are laid out across locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// One cadence fires every location at once
    FanOut,
    /// Each location fires at its own minute offset within a shared period
    Staggered,
}

/// Scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "defaults::topology")]
    pub topology: Topology,

    /// Five-field cron expression used by the fan-out topology
    #[serde(default = "defaults::cadence")]
    pub cadence: String,

    /// Shared base period for the staggered topology; must divide 60
    #[serde(default = "defaults::period_minutes")]
    pub period_minutes: u32,

    /// Run every (or the subset of) location once at process start
    #[serde(default = "defaults::run_on_startup")]
    pub run_on_startup: bool,

    /// Restrict the startup run to these location ids
    #[serde(default)]
    pub startup_subset: Option<Vec<String>>,

    /// Delay between staggered startup launches, in seconds
    #[serde(default)]
    pub startup_spacing_secs: u64,

    /// Live sessions after a firing above which a leak is reported
    #[serde(default = "defaults::leak_warn_threshold")]
    pub leak_warn_threshold: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            topology: defaults::topology(),
            cadence: defaults::cadence(),
            period_minutes: defaults::period_minutes(),
            run_on_startup: defaults::run_on_startup(),
            startup_subset: None,
            startup_spacing_secs: 0,
            leak_warn_threshold: defaults::leak_warn_threshold(),
        }
    }
}

/// Optional external liveness monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Base URL; pings go to `{url}/{job}/start` and `{url}/{job}`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "defaults::heartbeat_timeout")]
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: defaults::heartbeat_timeout(),
        }
    }
}

mod defaults {
    use super::{PublishSink, RendererBackend, Topology};
    use crate::models::Location;

    // Site defaults
    pub fn scheme() -> String {
        "https".into()
    }
    pub fn domain() -> String {
        "thefitness.hr".into()
    }
    pub fn path() -> String {
        "/calendar".into()
    }

    // Fetcher defaults
    pub fn backend() -> RendererBackend {
        RendererBackend::Chromium
    }
    pub fn navigation_timeout() -> u64 {
        60
    }
    pub fn ready_selector() -> String {
        "table.calendar_table".into()
    }
    pub fn ready_timeout() -> u64 {
        15
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; kiosk/0.1)".into()
    }

    // Publisher defaults
    pub fn sink() -> PublishSink {
        PublishSink::S3
    }
    pub fn local_dir() -> String {
        "public".into()
    }
    pub fn content_type() -> String {
        "text/html".into()
    }
    pub fn cache_control() -> String {
        "no-cache, no-store, must-revalidate".into()
    }

    // Schedule defaults
    pub fn topology() -> Topology {
        Topology::Staggered
    }
    pub fn cadence() -> String {
        "*/30 * * * *".into()
    }
    pub fn period_minutes() -> u32 {
        30
    }
    pub fn run_on_startup() -> bool {
        true
    }
    pub fn leak_warn_threshold() -> usize {
        8
    }

    pub fn heartbeat_timeout() -> u64 {
        10
    }

    // Location defaults
    pub fn locations() -> Vec<Location> {
        [
            ("branimir", "Branimir Mingle Mall", None),
            ("dubrava", "Dubrava", None),
            ("greengold", "Green Gold Centar", None),
            ("dvorana", "Dvorana", Some(1)),
            ("hala", "Hala", None),
            ("hob", "Hob", None),
            ("kaptol", "Kaptol Center", None),
            ("mamutica", "Mamutica", None),
            ("zcentar", "Z Centar", None),
            ("zavrtnica", "Zavrtnica", Some(1)),
            ("zonar", "Zonar Hotel", None),
        ]
        .into_iter()
        .map(|(id, name, trim)| Location {
            id: id.to_string(),
            display_name: name.to_string(),
            trim_columns: trim,
            offset_minutes: None,
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.fetcher.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_locations() {
        let mut config = Config::default();
        let first = config.locations[0].clone();
        config.locations.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate location id"));
    }

    #[test]
    fn validate_rejects_unknown_startup_subset() {
        let mut config = Config::default();
        config.schedule.startup_subset = Some(vec!["atlantis".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [site]
            domain = "example.com"

            [[locations]]
            id = "dubrava"
            display_name = "Dubrava"
            "#,
        )
        .unwrap();

        assert_eq!(config.site.domain, "example.com");
        assert_eq!(config.site.scheme, "https");
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.fetcher.backend, RendererBackend::Chromium);
        assert_eq!(config.schedule.topology, Topology::Staggered);
        assert_eq!(config.publisher.cache_control, "no-cache, no-store, must-revalidate");
    }

    #[test]
    fn kebab_case_enums_parse() {
        let config: Config = toml::from_str(
            r#"
            [fetcher]
            backend = "http"

            [publisher]
            sink = "local"

            [schedule]
            topology = "fan-out"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetcher.backend, RendererBackend::Http);
        assert_eq!(config.publisher.sink, PublishSink::Local);
        assert_eq!(config.schedule.topology, Topology::FanOut);
        // No [[locations]] table means the built-in list.
        assert_eq!(config.locations.len(), 11);
    }
}
