//! # Queue Abstraction
//!
//! At-least-once message broker contract used by state processors and the
//! callback manager. A [`Broker`] hands out [`Channel`]s; a channel either
//! publishes or consumes, never both. Consumers receive each message as a
//! [`Delivery`] that must be acknowledged or rejected (requeued).
//!
//! [`InMemoryBroker`] implements the contract inside one process.

pub mod memory;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{InMemoryBroker, QueueStats};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("channel is closed")]
    ChannelClosed,

    #[error("broker is closed")]
    BrokerClosed,

    #[error("channel already consumes queue '{queue_name}'")]
    ConsumerExists { queue_name: String },

    #[error("queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("queue backend error: {message}")]
    Backend { message: String },
}

impl QueueError {
    pub fn consumer_exists(queue_name: impl Into<String>) -> Self {
        Self::ConsumerExists {
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// One received message. Settling twice is a no-op.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];

    async fn ack(&self);

    /// Returns the message to the queue for redelivery.
    async fn reject(&self);
}

/// Called once per delivered message, each call on its own task.
pub type DeliveryHandler = Arc<dyn Fn(Box<dyn Delivery>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`DeliveryHandler`].
pub fn delivery_handler<F, Fut>(f: F) -> DeliveryHandler
where
    F: Fn(Box<dyn Delivery>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |delivery| Box::pin(f(delivery)))
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Fire-and-forget. Failures are logged by the backend, not returned.
    async fn publish(&self, queue: &str, body: Vec<u8>);

    /// Starts a background consumer; returns once it is registered.
    async fn consume(&self, queue: &str, handler: DeliveryHandler) -> Result<(), QueueError>;

    /// Stops consuming and waits for in-flight handlers to finish.
    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn channel(&self) -> Result<Arc<dyn Channel>, QueueError>;

    async fn close(&self);
}
