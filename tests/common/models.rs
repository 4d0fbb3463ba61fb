//! Model fixtures and handler builders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fsm_engine::model::{handler_fn, EventHandler, Model, ModelRef, StateDefinition};

pub const QUEUE_A: &str = "a_event_queue";
pub const QUEUE_B: &str = "b_event_queue";

/// Terminates the transaction.
pub fn finish() -> Arc<dyn EventHandler> {
    handler_fn(|_, _| async { Ok(None) })
}

/// Moves the transaction to `target`.
pub fn goto(target: &'static str) -> Arc<dyn EventHandler> {
    handler_fn(move |ctx, _| async move { Ok(ctx.resolve(target)) })
}

/// Counts invocations, then moves to `target`.
pub fn counting_goto(calls: Arc<AtomicUsize>, target: &'static str) -> Arc<dyn EventHandler> {
    handler_fn(move |ctx, _| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ctx.resolve(target))
        }
    })
}

/// Always reports an error.
pub fn failing(calls: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    handler_fn(move |_, _| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("payment provider unavailable"))
        }
    })
}

/// Always panics.
pub fn panicking(calls: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    handler_fn(move |_, _| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            panic!("handler exploded");
        }
    })
}

/// `A` (initial, may move to `A` or `B`) and `B` (success final).
pub fn two_state_model(name: &str, a_handler: Arc<dyn EventHandler>) -> ModelRef {
    Model::builder(name)
        .state(
            StateDefinition::new("A", a_handler)
                .initial()
                .transitions(["A", "B"]),
        )
        .state(StateDefinition::new("B", finish()).success_final())
        .build()
        .expect("valid two state model")
}

/// `A` retries through `handler` and escalates to `A_FAILED` (fail final).
pub fn model_with_fallback(name: &str, a_handler: Arc<dyn EventHandler>) -> ModelRef {
    Model::builder(name)
        .state(
            StateDefinition::new("A", a_handler)
                .initial()
                .transitions(["B"]),
        )
        .state(StateDefinition::new("B", finish()).success_final())
        .auto_fallback_states()
        .build()
        .expect("valid model with fallback")
}
