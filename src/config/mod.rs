//! # Engine Configuration
//!
//! Layered configuration for the engine, the callback manager, the lock
//! backends and logging. Every field has a default, so an empty or partial
//! file is valid; see [`ConfigManager`] for the layering order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fsm_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/fsm.yaml")?;
//!
//! let retries = manager.config().engine.event_retry_max_count;
//! let callback_timeout = manager.config().callback.request_timeout();
//! # Ok(())
//! # }
//! ```
//!
//! Durations are stored as milliseconds (`*_ms`) and exposed as
//! [`std::time::Duration`] through accessor methods.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FsmConfig {
    pub engine: EngineConfig,
    pub callback: CallbackConfig,
    pub lock: LockConfig,
    pub telemetry: TelemetryConfig,
}

impl FsmConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.callback.validate()?;
        self.lock.validate()
    }
}

/// Engine and pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    /// Retry budget for states that do not declare one
    pub event_retry_max_count: u32,
    /// Minimum spacing between attempts for states that do not declare one
    pub event_retry_min_delay_ms: u64,
    /// Back-off before a delivery whose tx lock is held gets requeued
    pub lock_retry_delay_ms: u64,
    pub lock_prefix: String,
    /// Opens a child span for every pipeline step
    pub verbose_tracing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "fsm-engine".to_string(),
            event_retry_max_count: constants::retry::EVENT_RETRY_MAX_COUNT,
            event_retry_min_delay_ms: constants::retry::EVENT_RETRY_MIN_DELAY.as_millis() as u64,
            lock_retry_delay_ms: constants::retry::LOCK_RETRY_DELAY.as_millis() as u64,
            lock_prefix: constants::lock::TX_LOCK_PREFIX.to_string(),
            verbose_tracing: false,
        }
    }
}

impl EngineConfig {
    pub fn event_retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.event_retry_min_delay_ms)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_retry_max_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.event_retry_max_count",
                "0",
                "retry budget must allow at least one attempt",
            ));
        }
        if self.lock_prefix.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "engine.lock_prefix",
                "",
                "lock keys need a non-empty prefix",
            ));
        }
        Ok(())
    }
}

/// HTTP callback delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub sync_retry_count: u32,
    pub sync_retry_delay_ms: u64,
    pub async_retry_count: u32,
    pub async_retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub queue_name: String,
    pub user_agent: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            sync_retry_count: constants::callback::SYNC_RETRY_COUNT,
            sync_retry_delay_ms: constants::callback::SYNC_RETRY_DELAY.as_millis() as u64,
            async_retry_count: constants::callback::ASYNC_RETRY_COUNT,
            async_retry_delay_ms: constants::callback::ASYNC_RETRY_DELAY.as_millis() as u64,
            request_timeout_ms: constants::callback::REQUEST_TIMEOUT.as_millis() as u64,
            queue_name: constants::callback::QUEUE_NAME.to_string(),
            user_agent: constants::callback::USER_AGENT.to_string(),
        }
    }
}

impl CallbackConfig {
    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }

    pub fn async_retry_delay(&self) -> Duration {
        Duration::from_millis(self.async_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Attempts made before a callback is abandoned.
    pub fn total_attempts(&self) -> u32 {
        self.sync_retry_count + self.async_retry_count
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sync_retry_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.sync_retry_count",
                "0",
                "at least one synchronous attempt is required",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.request_timeout_ms",
                "0",
                "request timeout must be positive",
            ));
        }
        if self.queue_name.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "callback.queue_name",
                "",
                "callback queue needs a name",
            ));
        }
        Ok(())
    }
}

/// Lock backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_ttl_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: constants::lock::LEASE_TTL.as_millis() as u64,
        }
    }
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.lease_ttl_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.lease_ttl_ms",
                "0",
                "lease ttl must be positive",
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
