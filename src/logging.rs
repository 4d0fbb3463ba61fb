//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Logs go to stdout so that containers and process supervisors collect them.
//!
//! This module provides:
//! - Console logging, human-readable or JSON lines
//! - `RUST_LOG` filtering with a configured fallback level
//! - TTY-aware ANSI color output
//! - Idempotent initialization that tolerates a subscriber installed elsewhere
//!
//! ## Structured fields
//!
//! The engine logs with stable field names so that one transaction can be
//! followed across states and consumers:
//!
//! - `tx_id`, `event_id`, `retry_n` on every pipeline record
//! - `state`, `queue` on processor and pipeline records
//! - `trace_id`, `span_id` on the per-event span
//! - `error` for the display form of a failure

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once per process.
pub fn init_tracing(config: &TelemetryConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            registry
                .with(fmt::layer().json().with_target(true).with_current_span(true))
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_ansi(std::io::stdout().is_terminal())
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init()
        };

        // A failed try_init means another subscriber is already installed; keep it.
        if result.is_ok() {
            tracing::info!(
                environment = %environment,
                json = config.json,
                "Console logging initialized"
            );
        }
    });
}

/// Deployment environment from `FSM_ENV`, then `APP_ENV`, else `development`.
pub fn get_environment() -> String {
    std::env::var("FSM_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}
