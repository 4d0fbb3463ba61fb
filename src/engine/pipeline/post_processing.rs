use std::sync::Arc;
use tracing::{error, trace, warn, Instrument};

use super::{PipelineError, PipelineResult, ProcessPipeline};
use crate::model::{Event, EventStatus, TxStatus};

impl ProcessPipeline {
    /// A faulted handler retries the same state.
    pub(super) fn resolve_next_state(&mut self) {
        if self.handler_faulted {
            self.event.set_status(EventStatus::Retry);
            self.next_state = Some(Arc::clone(&self.state));
        } else {
            self.event.set_status(EventStatus::Done);
        }
    }

    /// Computes and persists the next event, or finishes the tx.
    ///
    /// The next event is only staged here; it is published on teardown,
    /// after the tx lock has been released.
    pub(super) async fn next_event(&mut self) -> PipelineResult {
        let span = self.step_span("next_event");
        async {
            let Some(mut next_state) = self.next_state.clone() else {
                self.event.tx.status = TxStatus::Done;
                self.event.tx.touch();
                return Ok(());
            };

            self.event.final_state = next_state.name().to_string();
            self.event.tx.state = next_state.name().to_string();
            self.event.tx.status = TxStatus::Pending;
            self.event.tx.touch();

            let mut retry_n = if next_state.is(&self.state) {
                self.event.retry_n.saturating_add(1)
            } else {
                0
            };

            let budget = self
                .state
                .retry_policy()
                .budget(self.config.settings.event_retry_max_count);
            if retry_n > 0 && retry_n >= budget.saturating_sub(1) {
                self.event.set_status(EventStatus::Error);
                self.event.tx.status = TxStatus::Error;

                error!(
                    retry_n = self.event.retry_n,
                    budget,
                    fallback = self.state.fallback_name().unwrap_or(""),
                    "max retry count exceeded"
                );

                match self.state.fallback_state() {
                    Some(fallback) => {
                        self.event.final_state = fallback.name().to_string();
                        self.event.tx.state = fallback.name().to_string();
                        retry_n = 0;
                        next_state = fallback;
                    }
                    None => {
                        self.next_state = None;
                        return Ok(());
                    }
                }
            }

            let next_event = Event::new(&next_state, self.event.tx.clone(), retry_n);

            let body = match next_event.encode() {
                Ok(body) => body,
                Err(err) => {
                    error!(error = %err, "can't encode next event");
                    self.delivery.reject().await;
                    return Err(PipelineError::Encode(err));
                }
            };

            if let Err(err) = self.config.repository.update_event(&next_event).await {
                error!(error = %err, "next event update error");
                self.delivery.reject().await;
                return Err(PipelineError::NextEvent(err));
            }

            trace!(
                next_state = %next_state.name(),
                next_event_id = %next_event.id,
                next_retry_n = retry_n,
                "next event staged"
            );
            self.next_state = Some(next_state);
            self.next_message = Some(body);
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub(super) async fn update_completed_event(&mut self) {
        let span = self.step_span("update_completed_event");
        async {
            if let Err(err) = self.config.repository.update_event(&self.event).await {
                warn!(status = %self.event.status, error = %err, "event update error");
            }
        }
        .instrument(span)
        .await
    }

    /// Stores the outcome, guarded on the tx still being in the consumed state.
    pub(super) async fn update_completed_tx(&mut self) -> PipelineResult {
        let span = self.step_span("update_completed_tx");
        async {
            if let Err(err) = self
                .config
                .repository
                .update_transaction(&self.event.tx, self.state.name())
                .await
            {
                error!(error = %err, "can't update transaction status");
                self.delivery.reject().await;
                return Err(PipelineError::CompletionUpdate(err));
            }

            trace!(status = %self.event.tx.status, "tx updated");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Notifies the tx owner when a final state was processed.
    pub(super) async fn send_callback(&self) {
        if !self.state.is_final() {
            return;
        }

        let span = self.step_span("send_callback");
        self.config
            .callbacks
            .send(&self.event.tx)
            .instrument(span)
            .await;
    }
}
