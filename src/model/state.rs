//! # States
//!
//! A [`State`] is one node of a model graph: its queue, its retry policy, the
//! states it may move to and the business handler that decides where a
//! transaction goes next. States are created by [`super::ModelBuilder`] and
//! live as long as their model; identity is decided by [`StateId`], never by
//! comparing attributes.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::event::Event;
use super::fsm_model::{Model, ModelRef};
use super::transaction::check_attribute_key;
use crate::engine::Engine;
use crate::error::ModelError;

pub type StateRef = Arc<State>;

/// Failure reported by a business handler. Treated like a panic: the step is retried.
pub type HandlerError = anyhow::Error;

/// `Ok(Some(state))` moves the transaction on, `Ok(None)` finishes it.
pub type HandlerResult = Result<Option<StateRef>, HandlerError>;

/// Business behaviour of a state.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: HandlerContext, event: Event) -> HandlerResult;
}

/// [`EventHandler`] backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, event: Event) -> HandlerResult {
        (self.f)(ctx, event).await
    }
}

/// Wraps an async closure into a shareable handler.
///
/// ```rust
/// use fsm_engine::model::handler_fn;
///
/// let finish = handler_fn(|_ctx, _event| async { Ok(None) });
/// # let _ = finish;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(HandlerContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// What a handler can reach while processing an event.
///
/// Attribute writes are stored on the transaction when the pipeline persists
/// the outcome of the event, whether or not the handler succeeded.
#[derive(Clone)]
pub struct HandlerContext {
    state: StateRef,
    attributes: Arc<Mutex<Map<String, Value>>>,
}

impl HandlerContext {
    pub(crate) fn new(state: StateRef, attributes: Map<String, Value>) -> Self {
        Self {
            state,
            attributes: Arc::new(Mutex::new(attributes)),
        }
    }

    /// State being processed.
    pub fn state(&self) -> &StateRef {
        &self.state
    }

    pub fn model(&self) -> Option<ModelRef> {
        self.state.model()
    }

    /// Resolves a sibling state of the same model by name.
    pub fn resolve(&self, name: &str) -> Option<StateRef> {
        self.model().and_then(|model| model.resolve(name))
    }

    /// Business service registered with the model.
    pub fn service<S: Any + Send + Sync>(&self) -> Result<Arc<S>, ModelError> {
        match self.model() {
            Some(model) => model.service::<S>(),
            None => Err(ModelError::ServiceType {
                model: String::new(),
                expected: std::any::type_name::<S>().to_string(),
            }),
        }
    }

    /// Engine the model is registered with, for transiting other transactions.
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.model().and_then(|model| model.engine())
    }

    /// Typed view of a transaction attribute, including writes made by this handler.
    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let attributes = self.attributes.lock();
        attributes
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Records a business attribute. Names of transaction fields are refused.
    pub fn set_attribute(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        let key = key.into();
        check_attribute_key(&key)?;
        self.attributes.lock().insert(key, value.into());
        Ok(())
    }

    pub(crate) fn attributes(&self) -> Map<String, Value> {
        self.attributes.lock().clone()
    }
}

/// Process-unique identity of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

/// Retry policy of a state. Zero values defer to the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries_count: u32,
    pub min_retries_delay: Duration,
}

impl RetryPolicy {
    /// Retry budget, falling back to `default_count` when undeclared.
    pub fn budget(&self, default_count: u32) -> u32 {
        if self.max_retries_count > 0 {
            self.max_retries_count
        } else {
            default_count
        }
    }

    /// Spacing between attempts, falling back to `default_delay` when undeclared.
    pub fn delay(&self, default_delay: Duration) -> Duration {
        if self.min_retries_delay.is_zero() {
            default_delay
        } else {
            self.min_retries_delay
        }
    }
}

pub struct State {
    pub(super) id: StateId,
    pub(super) name: String,
    pub(super) description: String,
    pub(super) event_type: String,
    pub(super) queue: String,
    pub(super) initial: bool,
    pub(super) success_final: bool,
    pub(super) fail_final: bool,
    pub(super) retry: RetryPolicy,
    pub(super) cancellation_ttl: Duration,
    pub(super) fallback: Option<String>,
    pub(super) transitions: Vec<String>,
    pub(super) handler: Arc<dyn EventHandler>,
    pub(super) model: Weak<Model>,
}

impl State {
    pub(super) fn allocate_id() -> StateId {
        StateId::next()
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn is_success_final(&self) -> bool {
        self.success_final
    }

    pub fn is_fail_final(&self) -> bool {
        self.fail_final
    }

    /// Reaching this state triggers the completion callback.
    pub fn is_final(&self) -> bool {
        self.success_final || self.fail_final
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn max_retries_count(&self) -> u32 {
        self.retry.max_retries_count
    }

    pub fn min_retries_delay(&self) -> Duration {
        self.retry.min_retries_delay
    }

    /// Declared only; nothing cancels transactions when it elapses.
    pub fn cancellation_ttl(&self) -> Duration {
        self.cancellation_ttl
    }

    pub fn transitions(&self) -> &[String] {
        &self.transitions
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Escalation target once the retry budget is exhausted.
    pub fn fallback_state(&self) -> Option<StateRef> {
        let name = self.fallback.as_deref()?;
        self.model()?.resolve(name)
    }

    pub fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.handler)
    }

    pub fn model(&self) -> Option<ModelRef> {
        self.model.upgrade()
    }

    /// Same declared state.
    pub fn is(&self, other: &State) -> bool {
        self.id == other.id
    }

    /// Whether a transaction in this state may be moved to `target`.
    pub fn can_transit_in(&self, target: &State) -> bool {
        Weak::ptr_eq(&self.model, &target.model)
            && self.transitions.iter().any(|name| name == target.name())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("initial", &self.initial)
            .field("success_final", &self.success_final)
            .field("fail_final", &self.fail_final)
            .field("fallback", &self.fallback)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}
