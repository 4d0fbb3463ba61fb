//! # Data Model
//!
//! Vocabulary shared by the engine and business handlers: models and their
//! states, transactions, events and the persistence contract.

pub mod event;
pub mod fsm_model;
pub mod pretty_id;
pub mod repository;
pub mod state;
pub mod transaction;

pub use event::{Event, EventStatus};
pub use fsm_model::{Model, ModelBuilder, ModelDefaults, ModelRef, StateDefinition};
pub use repository::{Repository, RepositoryError};
pub use state::{
    handler_fn, EventHandler, FnHandler, HandlerContext, HandlerError, HandlerResult, RetryPolicy,
    State, StateId, StateRef,
};
pub use transaction::{is_reserved_attribute, Tx, TxStatus, RESERVED_TX_FIELDS};
