#![allow(clippy::doc_markdown)] // Allow technical terms like OpenTelemetry in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # FSM Engine
//!
//! Durable, queue-backed finite-state-machine engine for long-running
//! business transactions such as payments.
//!
//! ## Overview
//!
//! A transaction moves through a directed graph of named states declared in a
//! [`model::Model`]. Each state has its own queue; an event published to it is
//! picked up by that state's consumer and run through a processing pipeline
//! that:
//!
//! - holds a system-wide lock on the transaction while it is processed
//! - discards stale or duplicate deliveries by reloading the stored transaction
//! - isolates faults of the business handler and retries them with back-off
//! - escalates to a fallback state once the retry budget is spent
//! - notifies the transaction owner over HTTP when a final state is reached
//!
//! ## Module Organization
//!
//! - [`engine`] - Engine, state processors and the processing pipeline
//! - [`model`] - States, models, transactions, events and the repository contract
//! - [`callback`] - Reliable completion callbacks
//! - [`lock`] - Transaction lock contract and backends
//! - [`queue`] - Message broker contract and the in-memory broker
//! - [`config`] - Layered configuration
//! - [`error`] - Caller-facing error categories
//! - [`logging`] / [`telemetry`] - Structured logging and trace propagation
//! - [`test_helpers`] - In-memory repositories
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fsm_engine::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! init_tracing(&manager.config().telemetry);
//!
//! let engine = Engine::new(
//!     manager.config().engine.clone(),
//!     EngineDependencies {
//!         repository: Arc::new(InMemoryRepository::new()),
//!         locker: Arc::new(MemoryLocker::new()),
//!         broker: Arc::new(InMemoryBroker::new()),
//!         callbacks: Arc::new(NoopCallbackManager),
//!     },
//! );
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod lock;
pub mod logging;
pub mod model;
pub mod queue;
pub mod telemetry;
pub mod test_helpers;

pub use callback::{CallbackManager, HttpCallbackManager, NoopCallbackManager};
pub use config::{ConfigManager, FsmConfig};
pub use engine::{Engine, EngineDependencies, StateProcessor};
pub use error::{EngineError, EngineResult, ErrorKind, ModelError};
pub use logging::init_tracing;
pub use model::{Event, EventStatus, Model, ModelBuilder, State, StateDefinition, Tx, TxStatus};

/// Everything needed to declare models and run an engine.
pub mod prelude {
    pub use crate::callback::{
        CallbackManager, CallbackRepository, HttpCallbackManager, NoopCallbackManager,
    };
    pub use crate::config::{ConfigManager, EngineConfig, FsmConfig};
    pub use crate::engine::{Engine, EngineDependencies};
    pub use crate::error::{EngineError, ErrorKind};
    pub use crate::lock::{Locker, MemoryLocker};
    pub use crate::logging::init_tracing;
    pub use crate::model::{
        handler_fn, Event, HandlerContext, HandlerResult, Model, Repository, StateDefinition,
        StateRef, Tx, TxStatus,
    };
    pub use crate::queue::{Broker, InMemoryBroker};
    pub use crate::test_helpers::InMemoryRepository;
}
