//! Binds one state to its consuming and publishing channels.

use std::sync::Arc;
use tracing::{debug, error};

use super::pipeline::{self, PipelineConfig};
use crate::model::{Event, StateRef};
use crate::queue::{delivery_handler, Channel, QueueError};

pub struct StateProcessor {
    state: StateRef,
    consumer: Arc<dyn Channel>,
    publisher: Arc<dyn Channel>,
    pipeline: Arc<PipelineConfig>,
}

impl StateProcessor {
    pub(crate) fn new(
        state: StateRef,
        consumer: Arc<dyn Channel>,
        publisher: Arc<dyn Channel>,
        pipeline: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            state,
            consumer,
            publisher,
            pipeline,
        }
    }

    pub fn state(&self) -> &StateRef {
        &self.state
    }

    /// Every delivery of the state queue runs its own pipeline.
    pub(crate) async fn start_consume(&self) -> Result<(), QueueError> {
        let config = Arc::clone(&self.pipeline);
        let state = Arc::clone(&self.state);

        self.consumer
            .consume(
                self.state.queue(),
                delivery_handler(move |delivery| {
                    let config = Arc::clone(&config);
                    let state = Arc::clone(&state);
                    async move { pipeline::process(config, state, delivery).await }
                }),
            )
            .await?;

        debug!(state = %self.state.name(), queue = %self.state.queue(), "state consumer started");
        Ok(())
    }

    /// Publishes `event` to this state's queue.
    pub async fn publish(&self, event: &Event) -> Result<(), serde_json::Error> {
        let body = event.encode().inspect_err(|err| {
            error!(
                state = %self.state.name(),
                event_id = %event.id,
                error = %err,
                "event encoding error"
            );
        })?;

        self.publish_encoded(body).await;
        Ok(())
    }

    pub(crate) async fn publish_encoded(&self, body: Vec<u8>) {
        self.publisher.publish(self.state.queue(), body).await;
    }

    /// Stops consuming and waits for in-flight pipelines.
    pub(crate) async fn stop_consume(&self) -> Result<(), QueueError> {
        self.consumer.close().await
    }
}

impl std::fmt::Debug for StateProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProcessor")
            .field("state", &self.state.name())
            .field("queue", &self.state.queue())
            .finish_non_exhaustive()
    }
}
