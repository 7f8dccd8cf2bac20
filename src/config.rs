// src/config.rs

//! Startup configuration loading.
//!
//! Gathers the TOML config, the rule table and the process environment into
//! one validated [`Settings`]. Anything missing or malformed fails here,
//! before a single run is scheduled.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{Config, PublishSink, ScheduleEntry, plan_schedule};
use crate::services::RuleSet;

/// Static AWS keys taken from the environment.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Resolved S3 destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings<'a> {
    pub region: &'a str,
    pub bucket: &'a str,
}

/// Values read from the process environment (and `.env`).
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub aws_region: Option<String>,
    pub bucket_name: Option<String>,
    pub credentials: Option<AwsCredentials>,
    pub heartbeat_url: Option<String>,
    pub heartbeat_api_key: Option<String>,
}

impl Environment {
    /// Load `.env` if present, then read the process environment.
    pub fn from_process() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(AppError::config(format!(".env: {e}"))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let credentials = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::config(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together",
                ));
            }
        };

        Ok(Self {
            aws_region: get("AWS_REGION"),
            bucket_name: get("AWS_BUCKET_NAME"),
            credentials,
            heartbeat_url: get("KIOSK_HEARTBEAT_URL"),
            heartbeat_api_key: get("KIOSK_HEARTBEAT_API_KEY"),
        })
    }

    /// Region and bucket, both required for the S3 sink.
    pub fn s3(&self) -> Result<S3Settings<'_>> {
        let region = self
            .aws_region
            .as_deref()
            .ok_or_else(|| AppError::config("AWS_REGION is not set"))?;
        let bucket = self
            .bucket_name
            .as_deref()
            .ok_or_else(|| AppError::config("AWS_BUCKET_NAME is not set"))?;
        Ok(S3Settings { region, bucket })
    }
}

/// Everything the service needs, validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub rules: RuleSet,
    pub schedule: Vec<ScheduleEntry>,
    pub environment: Environment,
}

impl Settings {
    /// Load config from `path` (defaults when the file is absent) and the
    /// process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            Config::load(path)?
        } else {
            warn!("Config file {:?} not found, using defaults", path);
            Config::default()
        };
        Self::from_parts(config, Environment::from_process()?)
    }

    /// Validate a config against an environment.
    pub fn from_parts(config: Config, environment: Environment) -> Result<Self> {
        config.validate()?;

        let rules = match &config.rules_file {
            Some(file) => RuleSet::load(file)
                .map_err(|e| AppError::config(format!("rules_file {file}: {e}")))?,
            None => RuleSet::calendar(),
        };
        rules.validate()?;

        let schedule = plan_schedule(&config)?;

        if config.publisher.sink == PublishSink::S3 {
            environment.s3()?;
        }

        Ok(Self {
            config,
            rules,
            schedule,
            environment,
        })
    }

    /// Monitor base URL; the environment wins over the config file.
    pub fn heartbeat_url(&self) -> Option<&str> {
        self.environment
            .heartbeat_url
            .as_deref()
            .or(self.config.heartbeat.url.as_deref())
    }
}
