// src/error.rs

//! Unified error handling for the kiosk publisher.

use std::fmt;

use thiserror::Error;

/// Result type alias for kiosk operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Why a page fetch was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The hard navigation bound elapsed.
    Timeout,
    /// The target could not be loaded or read back.
    NavigationFailed,
    /// No rendering context could be created.
    ContextAcquisitionFailed,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::NavigationFailed => "navigation failed",
            FetchErrorKind::ContextAcquisitionFailed => "context acquisition failed",
        };
        f.write_str(label)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Page fetch failed
    #[error("Fetch error ({kind}): {message}")]
    Fetch {
        kind: FetchErrorKind,
        message: String,
    },

    /// The publish sink rejected a write
    #[error("Publish error for {key}: {message}")]
    Publish { key: String, message: String },

    /// Teardown of a rendering context failed
    #[error("Release error: {0}")]
    Release(String),

    /// The transformed document could not be serialized
    #[error("Serialize error: {0}")]
    Serialize(String),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Cron expression parsing failed
    #[error("Invalid cadence '{expression}': {message}")]
    Cadence { expression: String, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a fetch error of the given kind.
    pub fn fetch(kind: FetchErrorKind, message: impl fmt::Display) -> Self {
        Self::Fetch {
            kind,
            message: message.to_string(),
        }
    }

    /// Create a publish error for a key.
    pub fn publish(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Publish {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a release error.
    pub fn release(message: impl fmt::Display) -> Self {
        Self::Release(message.to_string())
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a cadence parsing error.
    pub fn cadence(expression: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Cadence {
            expression: expression.into(),
            message: message.to_string(),
        }
    }

    /// The fetch failure kind, if this is a fetch error.
    pub fn fetch_kind(&self) -> Option<FetchErrorKind> {
        match self {
            Self::Fetch { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
