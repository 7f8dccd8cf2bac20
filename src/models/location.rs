// src/models/location.rs

//! Task identities and their resolved fetch/publish targets.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::SiteConfig;

/// One mirrored location: the unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Host label and publish directory (e.g. "dubrava")
    pub id: String,

    /// Name shown in the injected page header
    pub display_name: String,

    /// Trailing calendar columns to drop; the rule default applies when unset
    #[serde(default)]
    pub trim_columns: Option<usize>,

    /// Minute offset within the staggered period; auto-assigned when unset
    #[serde(default)]
    pub offset_minutes: Option<u32>,
}

impl Location {
    /// Check that the id can serve as a host label and key segment.
    pub fn validate(&self) -> Result<()> {
        let valid = !self.id.is_empty()
            && !self.id.starts_with('-')
            && !self.id.ends_with('-')
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(AppError::config(format!(
                "Location id '{}' must be a lowercase host label",
                self.id
            )));
        }
        if self.display_name.trim().is_empty() {
            return Err(AppError::config(format!(
                "Location '{}' has an empty display_name",
                self.id
            )));
        }
        Ok(())
    }
}

/// A location with its URLs resolved against the site layout.
#[derive(Debug, Clone)]
pub struct Target {
    pub location: Location,
    /// Calendar page to fetch
    pub page_url: Url,
    /// Origin used to absolutize root-relative references
    pub origin: Url,
}

impl Target {
    pub fn id(&self) -> &str {
        &self.location.id
    }

    /// Deterministic publish key: `{prefix}{id}/index.html`.
    pub fn publish_key(&self, prefix: &str) -> String {
        format!("{}{}/index.html", prefix, self.location.id)
    }
}

impl SiteConfig {
    /// Resolve the page URL and origin for a location.
    pub fn target(&self, location: &Location) -> Result<Target> {
        let origin = Url::parse(&format!(
            "{}://{}.{}",
            self.scheme, location.id, self.domain
        ))?;
        let page_url = origin.join(&self.path)?;
        Ok(Target {
            location: location.clone(),
            page_url,
            origin,
        })
    }
}
