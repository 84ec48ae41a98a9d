//! Engine configuration
//!
//! Tuning knobs for the scheduler and the executor. Job definitions and global
//! settings live in the config store (see [`crate::model`]), not here.

use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timezone used when the store does not name one, or names an unknown one
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

/// Upper bound for any single remote request
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.scheduler.validate()?;
        self.executor.validate()?;
        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of runs executing at the same time, across all jobs
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long shutdown waits for in-flight runs before abandoning them
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl SchedulerConfig {
    /// Validate the scheduler configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.pool_size == 0 {
            return Err(crate::Error::config("Scheduler pool size must be > 0"));
        }
        Ok(())
    }

    /// Shutdown grace period as a [`Duration`]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Time bound for each remote request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// TTL written on DNS updates (seconds)
    #[serde(default = "default_dns_ttl_secs")]
    pub dns_ttl_secs: u32,

    /// Device group whose connect host is the IP source
    #[serde(default = "default_primary_inbound_id")]
    pub primary_inbound_id: i64,

    /// Maximum number of lines kept in a job's `last_log`
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl ExecutorConfig {
    /// Validate the executor configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(crate::Error::config(format!(
                "Request timeout must be between 1 and {} seconds",
                MAX_REQUEST_TIMEOUT_SECS
            )));
        }
        if self.dns_ttl_secs == 0 {
            return Err(crate::Error::config("DNS TTL must be > 0"));
        }
        if self.log_capacity == 0 {
            return Err(crate::Error::config("Log capacity must be > 0"));
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            dns_ttl_secs: default_dns_ttl_secs(),
            primary_inbound_id: default_primary_inbound_id(),
            log_capacity: default_log_capacity(),
        }
    }
}

/// Resolve an IANA timezone name
pub fn resolve_timezone(name: &str) -> Result<TimeZone, crate::Error> {
    TimeZone::get(name)
        .map_err(|e| crate::Error::invalid_input(format!("Unknown timezone '{}': {}", name, e)))
}

/// Resolve a timezone name, falling back to [`DEFAULT_TIMEZONE`]
///
/// Returns the zone and whether the fallback was taken.
pub fn timezone_or_default(name: &str) -> (TimeZone, bool) {
    match TimeZone::get(name) {
        Ok(tz) => (tz, false),
        Err(_) => (
            TimeZone::get(DEFAULT_TIMEZONE).unwrap_or(TimeZone::UTC),
            true,
        ),
    }
}

fn default_pool_size() -> usize {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_dns_ttl_secs() -> u32 {
    120
}

fn default_primary_inbound_id() -> i64 {
    1
}

fn default_log_capacity() -> usize {
    200
}
