//! # Engine Constants
//!
//! Operational defaults of the FSM engine. Every value here is also the
//! default of the matching field in [`crate::config::FsmConfig`], so a
//! deployment without a configuration file behaves exactly as described here.

use std::time::Duration;

/// Event retry policy defaults applied when a state does not declare its own.
pub mod retry {
    use super::Duration;

    /// Retry budget for one logical processing step of a transaction.
    pub const EVENT_RETRY_MAX_COUNT: u32 = 5;

    /// Minimum spacing between two attempts of the same logical step.
    pub const EVENT_RETRY_MIN_DELAY: Duration = Duration::from_secs(15);

    /// Back-off before a delivery is requeued because its tx lock is held.
    pub const LOCK_RETRY_DELAY: Duration = Duration::from_secs(15);
}

/// Locking defaults.
pub mod lock {
    use super::Duration;

    /// Prefix of the per-transaction lock key. The key is global across all states.
    pub const TX_LOCK_PREFIX: &str = "lock_tx:";

    /// Lease lifetime used by the TTL lock backend.
    pub const LEASE_TTL: Duration = Duration::from_secs(30);
}

/// Callback delivery defaults.
pub mod callback {
    use super::Duration;

    /// Synchronous attempts performed on the caller's task.
    pub const SYNC_RETRY_COUNT: u32 = 3;
    /// Spacing between synchronous attempts.
    pub const SYNC_RETRY_DELAY: Duration = Duration::from_secs(3);
    /// Asynchronous attempts performed from the callback queue.
    pub const ASYNC_RETRY_COUNT: u32 = 7;
    /// Minimum spacing between asynchronous attempts.
    pub const ASYNC_RETRY_DELAY: Duration = Duration::from_secs(10);
    /// Total timeout of one outbound HTTP call.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Queue holding callback events awaiting asynchronous redelivery.
    pub const QUEUE_NAME: &str = "callback_manager";
    pub const USER_AGENT: &str = "fsm-engine/http-callback-client v2.0.0";
    pub const CONTENT_TYPE_JSON: &str = "application/json";
    /// Response code recorded when the request never reached the server.
    pub const TRANSPORT_FAILURE_CODE: i32 = -1;
}

/// Prefixes stamped into generated identifiers so they are recognisable in logs.
pub mod ids {
    /// `EE00xxxx-...`
    pub const EVENT_ID_PREFIX: [u8; 2] = [0xEE, 0x00];
    /// `CABAnn..-...` where `nn` is the attempt number.
    pub const CALLBACK_ID_PREFIX: [u8; 2] = [0xCA, 0xBA];
    /// Byte of a callback event id carrying the attempt number.
    pub const CALLBACK_RETRY_BYTE: usize = 2;
}

/// Naming conventions for declared states.
pub mod naming {
    use super::Duration;

    pub const EVENT_TYPE_SUFFIX: &str = "_event";
    pub const QUEUE_SUFFIX: &str = "_queue";
    pub const FALLBACK_STATE_SUFFIX: &str = "_FAILED";

    /// Declared delays and TTLs must be zero or at least this long.
    pub const MIN_DECLARED_DURATION: Duration = Duration::from_secs(1);
}

/// Environment variable prefix for configuration overrides (`FSM_ENGINE__...`).
pub const CONFIG_ENV_PREFIX: &str = "FSM";
