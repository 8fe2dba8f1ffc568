//! Configuration for the shipper.
//!
//! The configuration document is JSON (camelCase keys). It is read either from a file or, the
//! way it is handed over inside a container, from the base64 encoded environment variable
//! [`ENV_CONFIG_OBJECT`]. [`Settings`] is the raw document, [`ShipperConfig`] the validated form
//! the rest of the crate consumes.
use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Deserialize;

use crate::Result;
use crate::error::Error;

pub const ENV_CONFIG_OBJECT: &str = "LOGSHIP_CONFIG_OBJECT";

/// CloudWatch Logs caps a PutLogEvents request at 1 MiB.
pub const DEFAULT_MAX_BATCH_SIZE_BYTES: usize = 1_048_576;
/// Bytes CloudWatch Logs adds to every event when sizing a request.
pub const DEFAULT_PER_EVENT_OVERHEAD_BYTES: usize = 26;
pub const DEFAULT_MAX_BATCH_EVENTS: usize = 10_000;
/// A single request may not span more than 24 hours of events.
pub const DEFAULT_MAX_BATCH_SPAN_SECS: u64 = 24 * 60 * 60;

const DEFAULT_MIN_DELIVERY_INTERVAL_SECS: f64 = 0.2;
const DEFAULT_MAX_CONCURRENT_DESTINATIONS: usize = 8;
const DEFAULT_RETRY_INITIAL_INTERVAL_MS: u32 = 200;
const DEFAULT_RETRY_MAX_INTERVAL_MS: u32 = 10_000;
const DEFAULT_RETRY_FACTOR: f64 = 2.0;
const DEFAULT_RETRY_JITTER: f64 = 0.1;
const DEFAULT_RETRY_MAX_ATTEMPTS: u16 = 10;
const DEFAULT_RETRY_MAX_ELAPSED_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub max_size_bytes: usize,
    pub per_event_overhead_bytes: usize,
    pub max_events: usize,
    pub max_span: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
            per_event_overhead_bytes: DEFAULT_PER_EVENT_OVERHEAD_BYTES,
            max_events: DEFAULT_MAX_BATCH_EVENTS,
            max_span: Duration::from_secs(DEFAULT_MAX_BATCH_SPAN_SECS),
        }
    }
}

/// Recovery budget of a single batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub factor: f64,
    pub jitter: f64,
    /// Recoveries (create, refresh or back off) a batch may go through before it is failed.
    pub max_attempts: u16,
    /// Wall time a batch may spend in delivery before it is failed.
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(u64::from(DEFAULT_RETRY_INITIAL_INTERVAL_MS)),
            max_interval: Duration::from_millis(u64::from(DEFAULT_RETRY_MAX_INTERVAL_MS)),
            factor: DEFAULT_RETRY_FACTOR,
            jitter: DEFAULT_RETRY_JITTER,
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            max_elapsed: Duration::from_secs(DEFAULT_RETRY_MAX_ELAPSED_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Minimum spacing between two put attempts, across all destinations.
    pub min_interval: Duration,
    pub max_concurrent_destinations: usize,
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs_f64(DEFAULT_MIN_DELIVERY_INTERVAL_SECS),
            max_concurrent_destinations: DEFAULT_MAX_CONCURRENT_DESTINATIONS,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShipperConfig {
    pub group_name_template: String,
    pub stream_name_template: String,
    /// `None` ships the whole record as canonical JSON.
    pub message_template: Option<String>,
    pub batch: BatchConfig,
    pub delivery: DeliveryConfig,
}

impl ShipperConfig {
    pub fn new(
        group_name_template: impl Into<String>,
        stream_name_template: impl Into<String>,
    ) -> Self {
        Self {
            group_name_template: group_name_template.into(),
            stream_name_template: stream_name_template.into(),
            message_template: None,
            batch: BatchConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_name_template.trim().is_empty() {
            return Err(Error::Config("logGroupName is required".to_string()));
        }
        if self.stream_name_template.trim().is_empty() {
            return Err(Error::Config("logStreamName is required".to_string()));
        }
        if self.batch.max_size_bytes == 0 {
            return Err(Error::Config("batch.maxSizeBytes must be positive".to_string()));
        }
        if self.batch.per_event_overhead_bytes >= self.batch.max_size_bytes {
            return Err(Error::Config(format!(
                "batch.perEventOverheadBytes ({}) must be below batch.maxSizeBytes ({})",
                self.batch.per_event_overhead_bytes, self.batch.max_size_bytes
            )));
        }
        if self.batch.max_events == 0 {
            return Err(Error::Config("batch.maxEvents must be positive".to_string()));
        }
        if self.delivery.max_concurrent_destinations == 0 {
            return Err(Error::Config(
                "delivery.maxConcurrentDestinations must be positive".to_string(),
            ));
        }
        let retry = &self.delivery.retry;
        // a new stream takes one recovery before its first write
        if retry.max_attempts == 0 {
            return Err(Error::Config(
                "delivery.retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(Error::Config(format!(
                "delivery.retry.jitter must be between 0 and 1, got {}",
                retry.jitter
            )));
        }
        if !retry.factor.is_finite() || retry.factor < 1.0 {
            return Err(Error::Config(format!(
                "delivery.retry.factor must be at least 1, got {}",
                retry.factor
            )));
        }
        if retry.initial_interval > retry.max_interval {
            return Err(Error::Config(
                "delivery.retry.initialIntervalMs must not exceed maxIntervalMs".to_string(),
            ));
        }
        Ok(())
    }
}

/// The configuration document as written by the user.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub message_template: String,
    pub batch: BatchSettings,
    pub delivery: DeliverySettings,
    pub aws: AwsSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSettings {
    pub max_size_bytes: usize,
    pub per_event_overhead_bytes: usize,
    pub max_events: usize,
    pub max_span_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
            per_event_overhead_bytes: DEFAULT_PER_EVENT_OVERHEAD_BYTES,
            max_events: DEFAULT_MAX_BATCH_EVENTS,
            max_span_secs: DEFAULT_MAX_BATCH_SPAN_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    pub min_interval_secs: f64,
    pub max_concurrent_destinations: usize,
    pub retry: RetrySettings,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_DELIVERY_INTERVAL_SECS,
            max_concurrent_destinations: DEFAULT_MAX_CONCURRENT_DESTINATIONS,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub initial_interval_ms: u32,
    pub max_interval_ms: u32,
    pub factor: f64,
    pub jitter: f64,
    pub max_attempts: u16,
    pub max_elapsed_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: DEFAULT_RETRY_INITIAL_INTERVAL_MS,
            max_interval_ms: DEFAULT_RETRY_MAX_INTERVAL_MS,
            factor: DEFAULT_RETRY_FACTOR,
            jitter: DEFAULT_RETRY_JITTER,
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            max_elapsed_secs: DEFAULT_RETRY_MAX_ELAPSED_SECS,
        }
    }
}

/// Where the AWS client should connect. Consumed by the binary, not by delivery.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl Settings {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {e}")))
    }

    /// Loads the base64 encoded document from [`ENV_CONFIG_OBJECT`].
    pub fn from_env(vars: &HashMap<String, String>) -> Result<Self> {
        let encoded = vars
            .get(ENV_CONFIG_OBJECT)
            .ok_or_else(|| Error::Config(format!("{ENV_CONFIG_OBJECT} is not set")))?;
        let decoded = BASE64_STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("Failed to base64 decode {ENV_CONFIG_OBJECT}: {e}")))?;
        Self::from_json(&decoded)
    }
}

impl TryFrom<&Settings> for ShipperConfig {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self> {
        let min_interval = Duration::try_from_secs_f64(settings.delivery.min_interval_secs)
            .map_err(|e| {
                Error::Config(format!(
                    "delivery.minIntervalSecs must be a non-negative number of seconds, got {}: {e}",
                    settings.delivery.min_interval_secs
                ))
            })?;

        let retry = &settings.delivery.retry;
        let config = ShipperConfig {
            group_name_template: settings.log_group_name.clone(),
            stream_name_template: settings.log_stream_name.clone(),
            message_template: Some(settings.message_template.clone())
                .filter(|template| !template.is_empty()),
            batch: BatchConfig {
                max_size_bytes: settings.batch.max_size_bytes,
                per_event_overhead_bytes: settings.batch.per_event_overhead_bytes,
                max_events: settings.batch.max_events,
                max_span: Duration::from_secs(settings.batch.max_span_secs),
            },
            delivery: DeliveryConfig {
                min_interval,
                max_concurrent_destinations: settings.delivery.max_concurrent_destinations,
                retry: RetryConfig {
                    initial_interval: Duration::from_millis(u64::from(retry.initial_interval_ms)),
                    max_interval: Duration::from_millis(u64::from(retry.max_interval_ms)),
                    factor: retry.factor,
                    jitter: retry.jitter,
                    max_attempts: retry.max_attempts,
                    max_elapsed: Duration::from_secs(retry.max_elapsed_secs),
                },
            },
        };
        config.validate()?;
        Ok(config)
    }
}
