//! # In-Memory Broker
//!
//! Process-local implementation of the queue contract for tests and
//! single-process deployments.
//!
//! ## Features
//!
//! - **Lazy queues**: declaring, publishing to or consuming from a queue creates it
//! - **Worker per message**: every delivery runs on its own task
//! - **Requeue on reject**: rejected or dropped-unsettled deliveries go back to the queue
//! - **Draining close**: closing a consuming channel waits for in-flight handlers
//! - **Statistics**: per-queue published/delivered/acked/rejected counters
//! - **History**: opt-in copy of every published body, see [`InMemoryBroker::with_history`]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, trace, warn};

use super::{Broker, Channel, Delivery, DeliveryHandler, QueueError};

/// Counters of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
}

impl QueueStats {
    /// Messages waiting for a consumer.
    pub fn pending(&self) -> u64 {
        (self.published + self.rejected).saturating_sub(self.delivered)
    }
}

struct MemoryQueue {
    name: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    /// Every published body, in publish order. Only kept when the broker records history.
    history: Option<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryQueue {
    fn new(name: &str, record_history: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            history: record_history.then(|| Mutex::new(Vec::new())),
        }
    }

    fn push(&self, body: Vec<u8>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if let Some(history) = &self.history {
            history.lock().push(body.clone());
        }
        self.enqueue(body);
    }

    fn enqueue(&self, body: Vec<u8>) {
        // The queue owns a sender and the receiver, so the channel never closes.
        if self.sender.send(body).is_err() {
            error!(queue = %self.name, "in-memory queue receiver dropped");
        }
    }

    async fn next(&self) -> Option<Vec<u8>> {
        self.receiver.lock().await.recv().await
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: DashMap<String, Arc<MemoryQueue>>,
    channels: Mutex<Vec<Weak<MemoryChannel>>>,
    closed: AtomicBool,
    record_history: bool,
}

impl BrokerState {
    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name, self.record_history)))
            .clone()
    }
}

/// Broker keeping every queue in process memory.
///
/// Cloning shares the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that also keeps a copy of every published body for [`Self::published`].
    ///
    /// The copies are never dropped, so this is meant for tests.
    pub fn with_history() -> Self {
        Self {
            state: Arc::new(BrokerState {
                record_history: true,
                ..BrokerState::default()
            }),
        }
    }

    pub fn queue_stats(&self, queue: &str) -> Option<QueueStats> {
        self.state.queues.get(queue).map(|q| q.stats())
    }

    /// Bodies published to `queue` so far, oldest first. Requeues are not included.
    ///
    /// Always empty unless the broker was built with [`Self::with_history`].
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .queues
            .get(queue)
            .and_then(|q| q.history.as_ref().map(|history| history.lock().clone()))
            .unwrap_or_default()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.state.queues.iter().map(|q| q.key().clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queues", &self.state.queues.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn channel(&self) -> Result<Arc<dyn Channel>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::BrokerClosed);
        }

        let channel = Arc::new(MemoryChannel::new(Arc::clone(&self.state)));
        let mut channels = self.state.channels.lock();
        channels.retain(|weak| weak.strong_count() > 0);
        channels.push(Arc::downgrade(&channel));

        Ok(channel)
    }

    async fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let channels: Vec<Arc<MemoryChannel>> = self
            .state
            .channels
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();

        for channel in channels {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "failed to close channel while closing broker");
            }
        }

        debug!("in-memory broker closed");
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    consuming: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MemoryChannel {
    fn new(state: Arc<BrokerState>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state,
            consuming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown,
            consumer: tokio::sync::Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.state.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::ChannelClosed);
        }
        self.state.queue(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) {
        if self.consuming.load(Ordering::Acquire) {
            error!(queue = %queue, "publishing on a consuming channel is not allowed");
            return;
        }
        if self.is_closed() {
            error!(queue = %queue, "publishing on a closed channel");
            return;
        }

        trace!(queue = %queue, bytes = body.len(), "message published");
        self.state.queue(queue).push(body);
    }

    async fn consume(&self, queue: &str, handler: DeliveryHandler) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::ChannelClosed);
        }
        if self.consuming.swap(true, Ordering::AcqRel) {
            return Err(QueueError::consumer_exists(queue));
        }

        let memory_queue = self.state.queue(queue);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(consume_loop(memory_queue, handler, shutdown));
        *self.consumer.lock().await = Some(handle);

        debug!(queue = %queue, "consumer started");
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.send_replace(true);

        let handle = self.consumer.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|err| QueueError::backend(format!("consumer task failed: {err}")))?;
        }

        Ok(())
    }
}

async fn consume_loop(
    queue: Arc<MemoryQueue>,
    handler: DeliveryHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(result) = in_flight.try_join_next() {
            log_worker_result(&queue.name, result);
        }

        let body = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            body = queue.next() => body,
        };
        let Some(body) = body else {
            break;
        };

        queue.delivered.fetch_add(1, Ordering::Relaxed);
        let delivery = MemoryDelivery {
            queue: Arc::clone(&queue),
            body,
            settled: AtomicBool::new(false),
        };
        in_flight.spawn(handler(Box::new(delivery)));
    }

    while let Some(result) = in_flight.join_next().await {
        log_worker_result(&queue.name, result);
    }

    debug!(queue = %queue.name, "consumer stopped");
}

fn log_worker_result(queue: &str, result: Result<(), JoinError>) {
    if let Err(err) = result {
        error!(queue = %queue, error = %err, "delivery worker terminated abnormally");
    }
}

struct MemoryDelivery {
    queue: Arc<MemoryQueue>,
    body: Vec<u8>,
    settled: AtomicBool,
}

impl MemoryDelivery {
    fn requeue(&self) {
        self.queue.rejected.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(self.body.clone());
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            self.queue.acked.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn reject(&self) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            self.requeue();
        }
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if !self.settled.swap(true, Ordering::AcqRel) {
            warn!(queue = %self.queue.name, "delivery dropped unsettled, requeueing");
            self.requeue();
        }
    }
}
