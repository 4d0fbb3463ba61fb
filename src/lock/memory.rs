//! In-process exclusive key set.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{Lock, LockError, Locker};

#[derive(Debug, Default)]
struct Holders {
    keys: DashMap<String, u64>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

/// Locker for single-process deployments. Every key is held by at most one
/// [`Lock`]; a second `obtain_lock` for the key fails until it is released.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocker {
    holders: Arc<Holders>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.holders.keys.contains_key(key)
    }

    pub fn held_count(&self) -> usize {
        self.holders.keys.len()
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn obtain_lock(&self, key: &str) -> Result<Box<dyn Lock>, LockError> {
        if self.holders.closed.load(Ordering::Acquire) {
            return Err(LockError::Closed);
        }

        let token = self.holders.next_token.fetch_add(1, Ordering::Relaxed);
        match self.holders.keys.entry(key.to_string()) {
            Entry::Occupied(_) => Err(LockError::not_obtained(key)),
            Entry::Vacant(slot) => {
                slot.insert(token);
                Ok(Box::new(MemoryLock {
                    holders: Arc::clone(&self.holders),
                    key: key.to_string(),
                    token,
                }))
            }
        }
    }

    async fn close(&self) -> Result<(), LockError> {
        self.holders.closed.store(true, Ordering::Release);
        let held = self.holders.keys.len();
        self.holders.keys.clear();
        debug!(held_locks = held, "memory locker closed");
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryLock {
    holders: Arc<Holders>,
    key: String,
    token: u64,
}

#[async_trait]
impl Lock for MemoryLock {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(&self) -> Result<(), LockError> {
        self.holders
            .keys
            .remove_if(&self.key, |_, token| *token == self.token)
            .map(|_| ())
            .ok_or_else(|| LockError::not_held(&self.key))
    }
}
