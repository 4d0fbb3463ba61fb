//! Persistence contract of the engine. Storage is supplied by the application.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::event::Event;
use super::transaction::Tx;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record not found: {id}")]
    NotFound { id: Uuid },

    /// Optimistic concurrency guard of `update_transaction` failed.
    #[error("transaction {id} is in state '{actual}', expected '{expected}'")]
    StateMismatch {
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("repository backend error: {message}")]
    Backend { message: String },
}

impl RepositoryError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Transaction and event storage.
///
/// Implementations must be safe for concurrent use by many pipeline workers.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn create_transaction(&self, tx: &Tx) -> Result<(), RepositoryError>;

    /// Stores `tx` only if the stored state is still `expected_state`.
    async fn update_transaction(&self, tx: &Tx, expected_state: &str)
        -> Result<(), RepositoryError>;

    async fn transaction(&self, id: Uuid) -> Result<Tx, RepositoryError>;

    /// Idempotent upsert keyed by event id.
    async fn update_event(&self, event: &Event) -> Result<(), RepositoryError>;
}
