//! # Process Pipeline
//!
//! One pipeline instance handles one delivered message of one state queue.
//! Steps run in a fixed order and the first failing step ends the run; work
//! already done is not rolled back.
//!
//! | Step | On failure |
//! |---|---|
//! | decode the event, reject a nil tx id | ack (discard) |
//! | wait for the retry delay of a retried event | never fails |
//! | obtain the tx lock | contention: back off, reject; other errors: reject |
//! | reload the tx and check it is still in this state | ack (discard) |
//! | start the `fsm.event` span | never fails |
//! | mark event and tx as in progress | event: warn; tx: reject |
//! | run the state handler, catching faults | never fails |
//! | resolve the next state and stage the next event | reject |
//! | persist event and tx outcome | event: warn; tx: reject |
//! | ack, then send the callback of a final state | never fails |
//!
//! Teardown always runs: the lock is released, then the staged next event is
//! published, then the span closes.

mod post_processing;
mod pre_processing;
mod processing;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, Instrument, Span};
use uuid::Uuid;

use crate::callback::CallbackManager;
use crate::config::EngineConfig;
use crate::lock::{Lock, LockError, Locker};
use crate::model::{Event, Repository, RepositoryError, StateRef};
use crate::queue::{Channel, Delivery};
use crate::telemetry::TraceContext;

/// Collaborators shared by every pipeline of one state.
pub(crate) struct PipelineConfig {
    pub repository: Arc<dyn Repository>,
    pub callbacks: Arc<dyn CallbackManager>,
    /// Publishing channel of the owning state processor.
    pub publisher: Arc<dyn Channel>,
    pub locker: Arc<dyn Locker>,
    pub settings: EngineConfig,
}

/// Why a pipeline run ended early. The delivery is already settled when one is returned.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("tx lock '{key}' is held by another consumer")]
    LockContention { key: String },

    #[error("tx lock '{key}' could not be obtained: {source}")]
    Lock { key: String, source: LockError },

    #[error("transaction lookup failed: {0}")]
    TransactionLookup(RepositoryError),

    #[error("tx {tx_id} is in state '{actual}', consumer of '{expected}' discards the event")]
    StateMismatch {
        tx_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("tx progress update failed: {0}")]
    ProgressUpdate(RepositoryError),

    #[error("next event encoding failed: {0}")]
    Encode(serde_json::Error),

    #[error("next event persistence failed: {0}")]
    NextEvent(RepositoryError),

    #[error("tx completion update failed: {0}")]
    CompletionUpdate(RepositoryError),
}

pub(crate) type PipelineResult = Result<(), PipelineError>;

/// Processes one delivery end to end.
pub(crate) async fn process(config: Arc<PipelineConfig>, state: StateRef, delivery: Box<dyn Delivery>) {
    trace!(
        state = %state.name(),
        bytes = delivery.body().len(),
        "event received"
    );

    let event = match Event::decode(delivery.body()) {
        Ok(event) => event,
        Err(err) => {
            error!(state = %state.name(), error = %err, "consumer message decode error");
            delivery.ack().await;
            return;
        }
    };

    if event.tx.id.is_nil() {
        error!(state = %state.name(), event_id = %event.id, "consumer message tx_id is nil");
        delivery.ack().await;
        return;
    }

    let mut pipeline = ProcessPipeline::new(config, state, delivery, event);
    if let Err(err) = pipeline.run().await {
        debug!(
            state = %pipeline.state.name(),
            tx_id = %pipeline.event.tx.id,
            event_id = %pipeline.event.id,
            error = %err,
            "event processing aborted"
        );
    }
    pipeline.stop().await;
}

pub(crate) struct ProcessPipeline {
    config: Arc<PipelineConfig>,
    /// State this pipeline consumes for.
    state: StateRef,
    delivery: Box<dyn Delivery>,
    event: Event,
    tx_lock: Option<Box<dyn Lock>>,
    span: Span,
    trace: Option<TraceContext>,
    handler_faulted: bool,
    next_state: Option<StateRef>,
    next_message: Option<Vec<u8>>,
}

impl ProcessPipeline {
    fn new(
        config: Arc<PipelineConfig>,
        state: StateRef,
        delivery: Box<dyn Delivery>,
        event: Event,
    ) -> Self {
        Self {
            config,
            state,
            delivery,
            event,
            tx_lock: None,
            span: Span::none(),
            trace: None,
            handler_faulted: false,
            next_state: None,
            next_message: None,
        }
    }

    async fn run(&mut self) -> PipelineResult {
        self.check_retry_delay().await;
        self.obtain_lock().await?;
        self.check_tx().await?;
        self.start_tracing();

        let span = self.span.clone();
        async {
            self.update_progress_event().await;
            self.update_progress_tx().await?;

            debug!("event preprocessed successfully");
            self.invoke_handler().await;

            self.resolve_next_state();
            self.next_event().await?;
            self.update_completed_event().await;
            self.update_completed_tx().await?;

            self.delivery.ack().await;
            trace!("queue delivery acknowledged");

            self.send_callback().await;
            debug!("event postprocessed successfully");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Releases the lock, then publishes the staged event.
    async fn stop(&mut self) {
        if let Some(lock) = self.tx_lock.take() {
            match lock.release().await {
                Ok(()) => trace!(key = %lock.key(), "event lock released"),
                Err(err) => error!(key = %lock.key(), error = %err, "event lock can't be released"),
            }
        }

        if let (Some(next_state), Some(body)) = (self.next_state.as_ref(), self.next_message.take()) {
            self.config.publisher.publish(next_state.queue(), body).await;
        }
    }

    /// Child span of the event span when verbose tracing is on.
    fn step_span(&self, step: &'static str) -> Span {
        if self.config.settings.verbose_tracing {
            tracing::info_span!(parent: &self.span, "fsm.step", step)
        } else {
            Span::none()
        }
    }

    fn lock_key(&self) -> String {
        format!("{}{}", self.config.settings.lock_prefix, self.event.tx.id)
    }
}
