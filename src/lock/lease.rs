//! # Lease Locks
//!
//! Locks that expire on their own. A lease is a random owner token stored
//! under the lock key with a deadline; it can be taken over only after the
//! deadline passes, and only the owner token can delete it. A crashed
//! consumer therefore blocks a transaction for at most one TTL.
//!
//! The storage side is the [`LeaseStore`] trait so that a networked key-value
//! store can back the leases in multi-process deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Lock, LockError, Locker};
use crate::config::LockConfig;

/// Atomic primitives a lease backend has to provide.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Stores `token` under `key` unless a live lease exists. Returns whether it was stored.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Deletes the lease only if it still belongs to `token`. Returns whether it was deleted.
    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError>;

    async fn close(&self) -> Result<(), LockError> {
        Ok(())
    }
}

/// Lease table kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live leases.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.leases
            .lock()
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        if let Some((_, deadline)) = leases.get(key) {
            if *deadline > now {
                return Ok(false);
            }
        }

        leases.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        match leases.get(key) {
            Some((owner, deadline)) if owner == token && *deadline > now => {
                leases.remove(key);
                Ok(true)
            }
            // An expired lease is dead regardless of owner.
            Some((_, deadline)) if *deadline <= now => {
                leases.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) -> Result<(), LockError> {
        self.leases.lock().clear();
        Ok(())
    }
}

/// [`Locker`] handing out expiring leases from a [`LeaseStore`].
#[derive(Debug)]
pub struct LeaseLocker<S: LeaseStore> {
    store: Arc<S>,
    ttl: Duration,
    closed: AtomicBool,
}

impl<S: LeaseStore> LeaseLocker<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(store: Arc<S>, config: &LockConfig) -> Self {
        Self::new(store, config.lease_ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl<S: LeaseStore> Locker for LeaseLocker<S> {
    async fn obtain_lock(&self, key: &str) -> Result<Box<dyn Lock>, LockError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LockError::Closed);
        }

        let token = Uuid::new_v4().to_string();
        if !self.store.try_acquire(key, &token, self.ttl).await? {
            return Err(LockError::not_obtained(key));
        }

        Ok(Box::new(LeaseLock {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            token,
        }))
    }

    async fn close(&self) -> Result<(), LockError> {
        self.closed.store(true, Ordering::Release);
        self.store.close().await
    }
}

struct LeaseLock<S: LeaseStore> {
    store: Arc<S>,
    key: String,
    token: String,
}

impl<S: LeaseStore> std::fmt::Debug for LeaseLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: LeaseStore> Lock for LeaseLock<S> {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(&self) -> Result<(), LockError> {
        if self.store.release(&self.key, &self.token).await? {
            Ok(())
        } else {
            Err(LockError::not_held(&self.key))
        }
    }
}
