//! # Transaction Locks
//!
//! Named exclusive locks. The pipeline holds one per transaction while it
//! processes an event and only needs to tell contention apart from backend
//! failure, so any backend implementing [`Locker`] can be plugged in:
//!
//! - [`MemoryLocker`]: exclusive key set for single-process deployments and tests
//! - [`LeaseLocker`]: expiring leases over a [`LeaseStore`] for multi-process deployments

pub mod lease;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use lease::{LeaseLocker, LeaseStore, MemoryLeaseStore};
pub use memory::MemoryLocker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Somebody else holds the lock.
    #[error("lock '{key}' is held by another owner")]
    NotObtained { key: String },

    /// The lock was released or expired before this release.
    #[error("lock '{key}' is not held by this owner")]
    NotHeld { key: String },

    #[error("locker is closed")]
    Closed,

    #[error("lock backend error: {message}")]
    Backend { message: String },
}

impl LockError {
    pub fn not_obtained(key: impl Into<String>) -> Self {
        Self::NotObtained { key: key.into() }
    }

    pub fn not_held(key: impl Into<String>) -> Self {
        Self::NotHeld { key: key.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// A held lock.
#[async_trait]
pub trait Lock: Send + Sync + std::fmt::Debug {
    fn key(&self) -> &str;

    async fn release(&self) -> Result<(), LockError>;
}

#[async_trait]
pub trait Locker: Send + Sync + 'static {
    /// Fails with [`LockError::NotObtained`] when the key is held.
    async fn obtain_lock(&self, key: &str) -> Result<Box<dyn Lock>, LockError>;

    /// Whether `err` means contention rather than a backend problem.
    fn is_not_obtained(&self, err: &LockError) -> bool {
        matches!(err, LockError::NotObtained { .. })
    }

    /// Releases all underlying resources.
    async fn close(&self) -> Result<(), LockError>;
}
