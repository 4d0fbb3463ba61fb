//! # Models
//!
//! A [`Model`] is a named, validated collection of states plus the business
//! service its handlers call into. Models are declared with [`ModelBuilder`]:
//!
//! ```rust
//! use fsm_engine::model::{handler_fn, Model, StateDefinition};
//!
//! let model = Model::builder("payment")
//!     .state(
//!         StateDefinition::new("PAYMENT_NEW", handler_fn(|ctx, _event| async move {
//!             Ok(ctx.resolve("PAYMENT_DONE"))
//!         }))
//!         .initial()
//!         .transitions(["PAYMENT_DONE"]),
//!     )
//!     .state(
//!         StateDefinition::new("PAYMENT_DONE", handler_fn(|_, _| async { Ok(None) }))
//!             .success_final(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.states().len(), 2);
//! ```

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use super::state::{handler_fn, EventHandler, RetryPolicy, State, StateRef};
use crate::constants::naming::{
    EVENT_TYPE_SUFFIX, FALLBACK_STATE_SUFFIX, MIN_DECLARED_DURATION, QUEUE_SUFFIX,
};
use crate::engine::Engine;
use crate::error::ModelError;

pub type ModelRef = Arc<Model>;

pub struct Model {
    name: String,
    states: Vec<StateRef>,
    index: HashMap<String, usize>,
    service: Option<Arc<dyn Any + Send + Sync>>,
    engine: OnceLock<Weak<Engine>>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// States in declaration order, generated fallback states last.
    pub fn states(&self) -> &[StateRef] {
        &self.states
    }

    pub fn resolve(&self, name: &str) -> Option<StateRef> {
        self.index.get(name).map(|&i| Arc::clone(&self.states[i]))
    }

    pub fn has(&self, state: &State) -> bool {
        self.resolve(state.name())
            .is_some_and(|declared| declared.is(state))
    }

    /// Business service downcast to `S`.
    pub fn service<S: Any + Send + Sync>(&self) -> Result<Arc<S>, ModelError> {
        let type_error = || ModelError::ServiceType {
            model: self.name.clone(),
            expected: std::any::type_name::<S>().to_string(),
        };
        let service = self.service.clone().ok_or_else(type_error)?;
        service.downcast::<S>().map_err(|_| type_error())
    }

    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.get().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_engine(&self, engine: Weak<Engine>) -> Result<(), ModelError> {
        self.engine
            .set(engine)
            .map_err(|_| ModelError::EngineAttached {
                model: self.name.clone(),
            })
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.engine.get().is_some()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("has_service", &self.service.is_some())
            .finish_non_exhaustive()
    }
}

/// Model-wide defaults for states that leave the values unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelDefaults {
    pub max_retries_count: u32,
    pub min_retries_delay: Duration,
    pub cancellation_ttl: Duration,
}

/// Declaration of one state before it is bound to its model.
pub struct StateDefinition {
    name: String,
    description: String,
    event_type: Option<String>,
    queue: Option<String>,
    initial: bool,
    success_final: bool,
    fail_final: bool,
    retry: RetryPolicy,
    cancellation_ttl: Duration,
    fallback: Option<String>,
    disable_fallback: bool,
    transitions: Vec<String>,
    handler: Arc<dyn EventHandler>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            event_type: None,
            queue: None,
            initial: false,
            success_final: false,
            fail_final: false,
            retry: RetryPolicy::default(),
            cancellation_ttl: Duration::ZERO,
            fallback: None,
            disable_fallback: false,
            transitions: Vec::new(),
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Overrides the derived `<lowercase name>_event` event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Overrides the derived `<event type>_queue` queue name.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn success_final(mut self) -> Self {
        self.success_final = true;
        self
    }

    pub fn fail_final(mut self) -> Self {
        self.fail_final = true;
        self
    }

    pub fn max_retries(mut self, count: u32) -> Self {
        self.retry.max_retries_count = count;
        self
    }

    pub fn min_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.min_retries_delay = delay;
        self
    }

    pub fn cancellation_ttl(mut self, ttl: Duration) -> Self {
        self.cancellation_ttl = ttl;
        self
    }

    pub fn fallback(mut self, state: impl Into<String>) -> Self {
        self.fallback = Some(state.into());
        self
    }

    /// Opts this state out of [`ModelBuilder::auto_fallback_states`].
    pub fn without_fallback(mut self) -> Self {
        self.disable_fallback = true;
        self
    }

    pub fn transitions<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions.extend(targets.into_iter().map(Into::into));
        self
    }

    fn is_final(&self) -> bool {
        self.success_final || self.fail_final
    }
}

pub struct ModelBuilder {
    name: String,
    defaults: ModelDefaults,
    states: Vec<StateDefinition>,
    service: Option<Arc<dyn Any + Send + Sync>>,
    auto_fallback: bool,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: ModelDefaults::default(),
            states: Vec::new(),
            service: None,
            auto_fallback: false,
        }
    }

    pub fn defaults(mut self, defaults: ModelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn service<S: Any + Send + Sync>(mut self, service: Arc<S>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn state(mut self, definition: StateDefinition) -> Self {
        self.states.push(definition);
        self
    }

    /// Adds a fail-final `<NAME>_FAILED` fallback to every non-final state
    /// that declares none. A state with that name declared explicitly is
    /// reused instead of generated.
    pub fn auto_fallback_states(mut self) -> Self {
        self.auto_fallback = true;
        self
    }

    pub fn build(self) -> Result<ModelRef, ModelError> {
        validate_model_name(&self.name)?;
        if self.states.is_empty() {
            return Err(ModelError::Empty { model: self.name });
        }

        let ModelBuilder {
            name,
            defaults,
            states,
            service,
            auto_fallback,
        } = self;

        let mut definitions: Vec<StateDefinition> = states
            .into_iter()
            .map(|definition| apply_defaults(definition, &defaults))
            .collect();

        if auto_fallback {
            add_fallback_states(&mut definitions);
        }

        validate_states(&name, &definitions)?;

        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, definition)| (definition.name.clone(), i))
            .collect();

        let model = Arc::new_cyclic(|weak_model: &Weak<Model>| {
            let states = definitions
                .into_iter()
                .map(|definition| Arc::new(bind_state(definition, weak_model.clone())))
                .collect();

            Model {
                name,
                states,
                index,
                service,
                engine: OnceLock::new(),
            }
        });

        Ok(model)
    }
}

fn apply_defaults(mut definition: StateDefinition, defaults: &ModelDefaults) -> StateDefinition {
    if definition.retry.max_retries_count == 0 {
        definition.retry.max_retries_count = defaults.max_retries_count;
    }
    if definition.retry.min_retries_delay.is_zero() {
        definition.retry.min_retries_delay = defaults.min_retries_delay;
    }
    if definition.cancellation_ttl.is_zero() {
        definition.cancellation_ttl = defaults.cancellation_ttl;
    }
    definition
}

fn add_fallback_states(definitions: &mut Vec<StateDefinition>) {
    let declared: HashSet<String> = definitions.iter().map(|d| d.name.clone()).collect();
    let mut generated = Vec::new();

    for definition in definitions.iter_mut() {
        if definition.is_final() || definition.disable_fallback || definition.fallback.is_some() {
            continue;
        }

        let fallback_name = format!("{}{}", definition.name, FALLBACK_STATE_SUFFIX);
        if !declared.contains(&fallback_name) {
            generated.push(
                StateDefinition::new(
                    fallback_name.clone(),
                    handler_fn(|_, _| async { Ok(None) }),
                )
                .description(format!("Failure sink for {}", definition.name))
                .fail_final()
                .max_retries(definition.retry.max_retries_count)
                .min_retry_delay(definition.retry.min_retries_delay)
                .cancellation_ttl(definition.cancellation_ttl),
            );
        }

        if !definition.transitions.contains(&fallback_name) {
            definition.transitions.push(fallback_name.clone());
        }
        definition.fallback = Some(fallback_name);
    }

    definitions.extend(generated);
}

fn validate_model_name(name: &str) -> Result<(), ModelError> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let allowed_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !starts_with_letter || !allowed_chars || name.ends_with('_') || name.contains("__") {
        return Err(ModelError::invalid_name(name, "model name should be in snake_case"));
    }
    Ok(())
}

fn validate_states(model: &str, definitions: &[StateDefinition]) -> Result<(), ModelError> {
    let mut names = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        if definition.name.is_empty() {
            return Err(ModelError::invalid_name("", "state name should not be empty"));
        }
        if !names.insert(definition.name.as_str()) {
            return Err(ModelError::DuplicateState {
                model: model.to_string(),
                state: definition.name.clone(),
            });
        }
    }

    for definition in definitions {
        let referenced = definition
            .transitions
            .iter()
            .chain(definition.fallback.iter());
        for target in referenced {
            if !names.contains(target.as_str()) {
                return Err(ModelError::unknown_state(model, target, &definition.name));
            }
        }

        if is_sub_second(definition.retry.min_retries_delay) {
            return Err(ModelError::invalid_duration(
                &definition.name,
                "min retry delay",
            ));
        }
        if is_sub_second(definition.cancellation_ttl) {
            return Err(ModelError::invalid_duration(
                &definition.name,
                "cancellation ttl",
            ));
        }
    }

    if !definitions.iter().any(|d| d.initial) {
        return Err(ModelError::MissingInitialState {
            model: model.to_string(),
        });
    }
    if !definitions.iter().any(StateDefinition::is_final) {
        return Err(ModelError::MissingFinalState {
            model: model.to_string(),
        });
    }

    Ok(())
}

fn is_sub_second(duration: Duration) -> bool {
    !duration.is_zero() && duration < MIN_DECLARED_DURATION
}

fn bind_state(definition: StateDefinition, model: Weak<Model>) -> State {
    let event_type = definition
        .event_type
        .unwrap_or_else(|| format!("{}{}", definition.name.to_lowercase(), EVENT_TYPE_SUFFIX));
    let queue = definition
        .queue
        .unwrap_or_else(|| format!("{event_type}{QUEUE_SUFFIX}"));

    State {
        id: State::allocate_id(),
        name: definition.name,
        description: definition.description,
        event_type,
        queue,
        initial: definition.initial,
        success_final: definition.success_final,
        fail_final: definition.fail_final,
        retry: definition.retry,
        cancellation_ttl: definition.cancellation_ttl,
        fallback: definition.fallback,
        transitions: definition.transitions,
        handler: definition.handler,
        model,
    }
}
