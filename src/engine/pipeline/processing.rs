use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};

use super::ProcessPipeline;
use crate::model::HandlerContext;

impl ProcessPipeline {
    /// Runs the state handler. Errors and panics mark the attempt as faulted.
    pub(super) async fn invoke_handler(&mut self) {
        let handler = self.state.handler();
        let context = HandlerContext::new(
            Arc::clone(&self.state),
            self.event.tx.attributes.clone(),
        );

        let outcome = AssertUnwindSafe(handler.handle(context.clone(), self.event.clone()))
            .catch_unwind()
            .instrument(info_span!("fsm.handler", state = %self.state.name()))
            .await;

        self.event.tx.attributes = context.attributes();

        match outcome {
            Ok(Ok(next_state)) => {
                debug!(
                    next_state = next_state.as_ref().map(|state| state.name()).unwrap_or(""),
                    "event handled"
                );
                self.next_state = next_state;
            }
            Ok(Err(err)) => {
                error!(error = %err, "state handler failed");
                self.handler_faulted = true;
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "panic recovered in state consumer");
                self.handler_faulted = true;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
