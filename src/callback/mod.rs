//! # Completion Callbacks
//!
//! When a transaction reaches a final state its owner is notified by an HTTP
//! POST of the transaction snapshot to `Tx::callback_url`. Delivery is
//! at-least-once within a bounded budget: a few synchronous attempts on the
//! caller's task, then asynchronous attempts driven from a queue. Every
//! attempt is persisted as a [`CallbackEvent`].
//!
//! - [`HttpCallbackManager`]: the reliable delivery described above
//! - [`NoopCallbackManager`]: for deployments without notifications

pub mod client;
pub mod event;
pub mod http;
pub mod noop;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::model::{RepositoryError, Tx};
use crate::queue::QueueError;

pub use client::{CallbackClient, CallbackResponse, ReqwestCallbackClient};
pub use event::{callback_event_id, CallbackEvent};
pub use http::HttpCallbackManager;
pub use noop::NoopCallbackManager;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid callback url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("callback serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("callback transport error: {message}")]
    Transport { message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("callback queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("callback repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CallbackError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Notifies transaction owners about completion.
///
/// `send` never fails from the caller's point of view; problems are logged
/// and retried internally.
#[async_trait]
pub trait CallbackManager: Send + Sync + 'static {
    async fn send(&self, tx: &Tx);

    /// Stops asynchronous delivery, waiting for in-flight attempts.
    async fn stop(&self) -> Result<(), CallbackError>;
}

/// Storage of delivery attempts.
#[async_trait]
pub trait CallbackRepository: Send + Sync + 'static {
    async fn callback_event(&self, id: Uuid) -> Result<CallbackEvent, RepositoryError>;

    /// Upsert keyed by the attempt id.
    async fn update_callback_event(&self, event: &CallbackEvent) -> Result<(), RepositoryError>;
}
