//! # In-Memory Repositories
//!
//! Process-local implementations of the persistence contracts. They back the
//! test suites and single-process setups where durability is not required.
//!
//! Both repositories expose inspection helpers and failure switches so that
//! tests can observe every write and exercise the checkpoints of the
//! processing pipeline that must fail hard.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

use crate::callback::{CallbackEvent, CallbackRepository};
use crate::model::{Event, EventStatus, Repository, RepositoryError, Tx};

/// Transactions and events kept in maps.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    transactions: DashMap<Uuid, Tx>,
    events: DashMap<Uuid, Event>,
    /// Every successful event write, in write order.
    event_log: Mutex<Vec<Event>>,
    fail_create: AtomicBool,
    fail_transaction_updates: AtomicBool,
    fail_event_updates: AtomicBool,
    failing_event_status: Mutex<Option<EventStatus>>,
    transaction_writes: AtomicU64,
    event_writes: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tx` directly, bypassing the engine.
    pub fn insert_transaction(&self, tx: Tx) {
        self.transactions.insert(tx.id, tx);
    }

    pub fn stored_transaction(&self, id: Uuid) -> Option<Tx> {
        self.transactions.get(&id).map(|tx| tx.clone())
    }

    pub fn event(&self, id: Uuid) -> Option<Event> {
        self.events.get(&id).map(|event| event.clone())
    }

    /// Latest version of every event of `tx_id`, oldest first.
    pub fn events_for(&self, tx_id: Uuid) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|event| event.tx.id == tx_id)
            .map(|event| event.clone())
            .collect();
        events.sort_by_key(|event| event.created);
        events
    }

    pub fn event_history(&self) -> Vec<Event> {
        self.event_log.lock().clone()
    }

    pub fn transaction_writes(&self) -> u64 {
        self.transaction_writes.load(Ordering::Relaxed)
    }

    pub fn event_writes(&self) -> u64 {
        self.event_writes.load(Ordering::Relaxed)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_transaction_updates(&self, fail: bool) {
        self.fail_transaction_updates.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_event_updates(&self, fail: bool) {
        self.fail_event_updates.store(fail, Ordering::Relaxed);
    }

    /// Fails only event writes carrying `status`; `None` clears the switch.
    pub fn set_failing_event_status(&self, status: Option<EventStatus>) {
        *self.failing_event_status.lock() = status;
    }

    fn event_write_fails(&self, event: &Event) -> bool {
        self.fail_event_updates.load(Ordering::Relaxed)
            || *self.failing_event_status.lock() == Some(event.status)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_transaction(&self, tx: &Tx) -> Result<(), RepositoryError> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(RepositoryError::backend("injected create failure"));
        }

        self.transactions.insert(tx.id, tx.clone());
        self.transaction_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update_transaction(
        &self,
        tx: &Tx,
        expected_state: &str,
    ) -> Result<(), RepositoryError> {
        if self.fail_transaction_updates.load(Ordering::Relaxed) {
            return Err(RepositoryError::backend("injected update failure"));
        }

        let mut stored = self
            .transactions
            .get_mut(&tx.id)
            .ok_or(RepositoryError::NotFound { id: tx.id })?;

        if stored.state != expected_state {
            return Err(RepositoryError::StateMismatch {
                id: tx.id,
                expected: expected_state.to_string(),
                actual: stored.state.clone(),
            });
        }

        *stored = tx.clone();
        self.transaction_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Tx, RepositoryError> {
        self.stored_transaction(id)
            .ok_or(RepositoryError::NotFound { id })
    }

    async fn update_event(&self, event: &Event) -> Result<(), RepositoryError> {
        if self.event_write_fails(event) {
            return Err(RepositoryError::backend("injected event failure"));
        }

        self.events.insert(event.id, event.clone());
        self.event_log.lock().push(event.clone());
        self.event_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Callback delivery attempts kept in a map.
#[derive(Debug, Default)]
pub struct InMemoryCallbackRepository {
    events: DashMap<Uuid, CallbackEvent>,
    writes: AtomicU64,
    fail_updates: AtomicBool,
}

impl InMemoryCallbackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts recorded for `tx_id`, by attempt number.
    pub fn events_for(&self, tx_id: Uuid) -> Vec<CallbackEvent> {
        let mut events: Vec<CallbackEvent> = self
            .events
            .iter()
            .filter(|event| event.tx_id == tx_id)
            .map(|event| event.clone())
            .collect();
        events.sort_by_key(|event| event.retry_n);
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl CallbackRepository for InMemoryCallbackRepository {
    async fn callback_event(&self, id: Uuid) -> Result<CallbackEvent, RepositoryError> {
        self.events
            .get(&id)
            .map(|event| event.clone())
            .ok_or(RepositoryError::NotFound { id })
    }

    async fn update_callback_event(&self, event: &CallbackEvent) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::Relaxed) {
            return Err(RepositoryError::backend("injected callback event failure"));
        }

        self.events.insert(event.id, event.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_transaction_guards_state() {
        let repository = InMemoryRepository::new();
        let mut tx = Tx::generate();
        tx.state = "NEW".to_string();
        repository.create_transaction(&tx).await.unwrap();

        tx.state = "DONE".to_string();
        let err = repository
            .update_transaction(&tx, "PROCESSING")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::StateMismatch { .. }));

        repository.update_transaction(&tx, "NEW").await.unwrap();
        assert_eq!(repository.stored_transaction(tx.id).unwrap().state, "DONE");
        assert_eq!(repository.transaction_writes(), 2);
    }

    #[tokio::test]
    async fn test_missing_transaction() {
        let repository = InMemoryRepository::new();
        let id = Uuid::new_v4();

        assert_eq!(
            repository.transaction(id).await.unwrap_err(),
            RepositoryError::NotFound { id }
        );
    }

    #[tokio::test]
    async fn test_callback_events_are_upserted() {
        let repository = InMemoryCallbackRepository::new();
        let mut event = CallbackEvent::new(Uuid::new_v4(), "http://localhost/cb", Vec::new());

        repository.update_callback_event(&event).await.unwrap();
        event.record_response(200, Vec::new());
        repository.update_callback_event(&event).await.unwrap();

        assert_eq!(repository.len(), 1);
        assert_eq!(repository.writes(), 2);
        assert!(repository.callback_event(event.id).await.unwrap().sent_successfully);
    }
}
