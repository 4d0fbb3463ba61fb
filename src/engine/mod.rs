//! # FSM Engine
//!
//! The engine is the only authority allowed to move a transaction between
//! states. It owns one [`StateProcessor`] per registered state and the shared
//! collaborators every processing pipeline uses.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new ──► add_model (per model) ──► create_tx / transit ... ──► stop
//! ```
//!
//! `add_model` starts one consumer per state; from then on every event
//! published to a state queue is processed by a pipeline of that state.
//! `stop` first stops all consumers and the callback consumer, waiting for
//! in-flight pipelines, and only then closes the broker and the locker.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fsm_engine::callback::NoopCallbackManager;
//! use fsm_engine::config::EngineConfig;
//! use fsm_engine::engine::{Engine, EngineDependencies};
//! use fsm_engine::lock::MemoryLocker;
//! use fsm_engine::model::{handler_fn, Model, StateDefinition, Tx};
//! use fsm_engine::queue::InMemoryBroker;
//! use fsm_engine::test_helpers::InMemoryRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     EngineDependencies {
//!         repository: Arc::new(InMemoryRepository::new()),
//!         locker: Arc::new(MemoryLocker::new()),
//!         broker: Arc::new(InMemoryBroker::new()),
//!         callbacks: Arc::new(NoopCallbackManager),
//!     },
//! );
//!
//! let model = Model::builder("payment")
//!     .state(
//!         StateDefinition::new("PAYMENT_NEW", handler_fn(|ctx, _| async move {
//!             Ok(ctx.resolve("PAYMENT_DONE"))
//!         }))
//!         .initial()
//!         .transitions(["PAYMENT_DONE"]),
//!     )
//!     .state(StateDefinition::new("PAYMENT_DONE", handler_fn(|_, _| async { Ok(None) })).success_final())
//!     .build()?;
//! engine.add_model(Arc::clone(&model)).await?;
//!
//! let mut tx = Tx::generate().with_callback_url("https://shop.example.com/payments/hook");
//! let initial = model.resolve("PAYMENT_NEW").ok_or("PAYMENT_NEW is not declared")?;
//! engine.create_tx(&mut tx, &initial).await?;
//!
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

mod pipeline;
pub mod state_processor;

use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, instrument};

use crate::callback::CallbackManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ModelError};
use crate::lock::Locker;
use crate::model::{Event, ModelRef, Repository, RepositoryError, StateId, StateRef, Tx, TxStatus};
use crate::queue::{Broker, QueueError};
use crate::telemetry::TraceContext;

use pipeline::PipelineConfig;
pub use state_processor::StateProcessor;

/// Collaborators shared by all states of an engine.
#[derive(Clone)]
pub struct EngineDependencies {
    pub repository: Arc<dyn Repository>,
    pub locker: Arc<dyn Locker>,
    pub broker: Arc<dyn Broker>,
    pub callbacks: Arc<dyn CallbackManager>,
}

pub struct Engine {
    config: EngineConfig,
    deps: EngineDependencies,
    models: RwLock<Vec<ModelRef>>,
    processors: RwLock<HashMap<StateId, Arc<StateProcessor>>>,
    /// Serializes `add_model` calls.
    registration: tokio::sync::Mutex<()>,
    this: Weak<Engine>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDependencies) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            deps,
            models: RwLock::new(Vec::new()),
            processors: RwLock::new(HashMap::new()),
            registration: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered models in registration order.
    pub fn models(&self) -> Vec<ModelRef> {
        self.models.read().clone()
    }

    pub fn is_registered(&self, model: &ModelRef) -> bool {
        self.models.read().iter().any(|m| Arc::ptr_eq(m, model))
    }

    pub fn processor(&self, state: &StateRef) -> Option<Arc<StateProcessor>> {
        self.processors.read().get(&state.id()).cloned()
    }

    /// Starts one consumer per state of `model` and attaches the model to this engine.
    #[instrument(skip_all, fields(model = %model.name()))]
    pub async fn add_model(&self, model: ModelRef) -> EngineResult<()> {
        let _registration = self.registration.lock().await;

        if self.is_registered(&model) {
            return Err(EngineError::already_registered(model.name()));
        }
        if model.is_attached() {
            return Err(ModelError::EngineAttached {
                model: model.name().to_string(),
            }
            .into());
        }

        let mut started: Vec<Arc<StateProcessor>> = Vec::with_capacity(model.states().len());
        for state in model.states() {
            match self.start_processor(state).await {
                Ok(processor) => started.push(processor),
                Err(err) => {
                    error!(state = %state.name(), error = %err, "state consumer start failed");
                    stop_processors(&started).await;
                    return Err(err);
                }
            }
        }

        if let Err(err) = model.attach_engine(self.this.clone()) {
            stop_processors(&started).await;
            return Err(err.into());
        }

        {
            let mut processors = self.processors.write();
            for processor in started {
                processors.insert(processor.state().id(), processor);
            }
        }
        self.models.write().push(Arc::clone(&model));

        info!(model = %model.name(), states = model.states().len(), "fsm consumers started");
        Ok(())
    }

    async fn start_processor(&self, state: &StateRef) -> EngineResult<Arc<StateProcessor>> {
        let channel_error = |stage: &str, err: QueueError| {
            EngineError::internal(format!("{stage} for state {}: {err}", state.name()))
        };

        let publisher = self
            .deps
            .broker
            .channel()
            .await
            .map_err(|e| channel_error("publishing channel creation", e))?;
        publisher
            .declare_queue(state.queue())
            .await
            .map_err(|e| channel_error("queue declaration", e))?;

        let consumer = self
            .deps
            .broker
            .channel()
            .await
            .map_err(|e| channel_error("consuming channel creation", e))?;

        let pipeline = Arc::new(PipelineConfig {
            repository: Arc::clone(&self.deps.repository),
            callbacks: Arc::clone(&self.deps.callbacks),
            publisher: Arc::clone(&publisher),
            locker: Arc::clone(&self.deps.locker),
            settings: self.config.clone(),
        });

        let processor = Arc::new(StateProcessor::new(
            Arc::clone(state),
            consumer,
            publisher,
            pipeline,
        ));
        processor
            .start_consume()
            .await
            .map_err(|e| channel_error("consumer start", e))?;

        Ok(processor)
    }

    /// First registered model declaring `state_name`, with that state.
    pub fn resolve(&self, state_name: &str) -> Option<(StateRef, ModelRef)> {
        self.models.read().iter().find_map(|model| {
            model
                .resolve(state_name)
                .map(|state| (state, Arc::clone(model)))
        })
    }

    /// Places `tx` into `init_state` and enqueues its first event.
    ///
    /// Nothing is enqueued, and `tx` is left as it was, when the transaction
    /// cannot be stored.
    #[instrument(skip_all, fields(tx_id = %tx.id, init_state = %init_state.name()))]
    pub async fn create_tx(&self, tx: &mut Tx, init_state: &StateRef) -> EngineResult<()> {
        if tx.id.is_nil() {
            return Err(EngineError::not_found("trying to move empty tx"));
        }

        let registered = init_state
            .model()
            .is_some_and(|model| self.is_registered(&model));
        if !registered {
            return Err(EngineError::not_found(format!(
                "{} has no registered model",
                init_state.name()
            )));
        }

        if !init_state.is_initial() {
            return Err(EngineError::permission_denied(format!(
                "state isn't initial state. state: {}",
                init_state.name()
            )));
        }

        let processor = self.processor(init_state).ok_or_else(|| {
            EngineError::not_found(format!("{} not initialized", init_state.name()))
        })?;

        // Staged on a copy so `tx` is untouched unless it was stored.
        let trace = TraceContext::new_root();
        let mut staged = tx.clone();
        staged.state = init_state.name().to_string();
        staged.status = TxStatus::Pending;
        staged.trace_id = trace.trace_id();
        staged.span_id = trace.span_id();
        staged.touch();

        let event = Event::new(init_state, staged.clone(), 0);
        let body = event
            .encode()
            .map_err(|e| EngineError::internal(format!("event encoding error: {e}")))?;

        self.deps
            .repository
            .create_transaction(&staged)
            .await
            .map_err(|e| EngineError::internal(format!("create transaction error: {e}")))?;

        *tx = staged;
        processor.publish_encoded(body).await;

        debug!(tx_id = %tx.id, event_id = %event.id, "tx created");
        Ok(())
    }

    /// Moves `tx` to `new_state` and enqueues the event processing it.
    ///
    /// On failure `tx` keeps its previous state and status.
    #[instrument(skip_all, fields(tx_id = %tx.id, from_state = %tx.state, to_state = %new_state.name()))]
    pub async fn transit(&self, tx: &mut Tx, new_state: &StateRef) -> EngineResult<()> {
        if tx.id.is_nil() {
            return Err(EngineError::not_found("trying to move empty tx"));
        }

        let current = new_state
            .model()
            .and_then(|model| model.resolve(&tx.state))
            .or_else(|| self.resolve(&tx.state).map(|(state, _)| state))
            .ok_or_else(|| {
                EngineError::not_found(format!("current state '{}' of tx is unknown", tx.state))
            })?;

        if current.is(new_state) {
            return Err(EngineError::permission_denied("tx in this state already"));
        }

        if !current.can_transit_in(new_state) {
            return Err(EngineError::permission_denied(format!(
                "transition is illegal from {} to {}",
                current.name(),
                new_state.name()
            )));
        }

        let processor = self.processor(new_state).ok_or_else(|| {
            EngineError::not_found(format!("{} not initialized", new_state.name()))
        })?;

        let previous_state = std::mem::replace(&mut tx.state, new_state.name().to_string());
        let previous_status = std::mem::replace(&mut tx.status, TxStatus::Pending);
        let previous_updated = tx.updated;
        tx.touch();

        let persisted = match Event::new(new_state, tx.clone(), 0).encode() {
            Ok(body) => self
                .deps
                .repository
                .update_transaction(tx, &previous_state)
                .await
                .map(|()| body)
                .map_err(|err| match err {
                    RepositoryError::NotFound { id } => {
                        EngineError::not_found(format!("transaction {id} not found"))
                    }
                    other => EngineError::internal(format!("update transaction error: {other}")),
                }),
            Err(err) => Err(EngineError::internal(format!("event encoding error: {err}"))),
        };

        match persisted {
            Ok(body) => {
                processor.publish_encoded(body).await;
                debug!(tx_id = %tx.id, from = %previous_state, to = %new_state.name(), "tx transited");
                Ok(())
            }
            Err(err) => {
                tx.state = previous_state;
                tx.status = previous_status;
                tx.updated = previous_updated;
                Err(err)
            }
        }
    }

    /// Stops consumers first, then the shared infrastructure.
    pub async fn stop(&self) {
        let processors: Vec<Arc<StateProcessor>> =
            self.processors.read().values().cloned().collect();

        let consumers = join_all(processors.iter().map(|processor| async move {
            if let Err(err) = processor.stop_consume().await {
                error!(
                    state = %processor.state().name(),
                    error = %err,
                    "error while stopping consumer in fsm"
                );
            }
        }));
        let callbacks = async {
            if let Err(err) = self.deps.callbacks.stop().await {
                error!(error = %err, "error while stopping callback consumer in fsm");
            }
        };
        futures::join!(consumers, callbacks);

        self.deps.broker.close().await;

        if let Err(err) = self.deps.locker.close().await {
            error!(error = %err, "error while closing locker in fsm");
        }

        info!("fsm stopped");
    }
}

async fn stop_processors(processors: &[Arc<StateProcessor>]) {
    for processor in processors {
        if let Err(err) = processor.stop_consume().await {
            error!(
                state = %processor.state().name(),
                error = %err,
                "error while stopping consumer after failed registration"
            );
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("models", &self.models.read().len())
            .field("processors", &self.processors.read().len())
            .finish_non_exhaustive()
    }
}
