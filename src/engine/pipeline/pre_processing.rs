use chrono::Utc;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use super::{PipelineError, PipelineResult, ProcessPipeline};
use crate::model::{EventStatus, TxStatus};
use crate::telemetry::TraceContext;

impl ProcessPipeline {
    /// Enforces the minimum spacing between attempts of the same step.
    pub(super) async fn check_retry_delay(&self) {
        if self.event.retry_n == 0 {
            return;
        }

        let delay = self
            .state
            .retry_policy()
            .delay(self.config.settings.event_retry_min_delay());
        let elapsed = (Utc::now() - self.event.created)
            .to_std()
            .unwrap_or_default();
        let remaining = delay.saturating_sub(elapsed);

        if !remaining.is_zero() {
            trace!(
                tx_id = %self.event.tx.id,
                delay_ms = remaining.as_millis() as u64,
                "delaying retried event"
            );
            tokio::time::sleep(remaining).await;
        }
    }

    pub(super) async fn obtain_lock(&mut self) -> PipelineResult {
        let key = self.lock_key();

        match self.config.locker.obtain_lock(&key).await {
            Ok(lock) => {
                self.tx_lock = Some(lock);
                trace!(key = %key, "tx lock obtained");
                Ok(())
            }
            Err(err) if self.config.locker.is_not_obtained(&err) => {
                debug!(
                    key = %key,
                    tx_id = %self.event.tx.id,
                    "lock already obtained by other consumer"
                );
                tokio::time::sleep(self.config.settings.lock_retry_delay()).await;
                self.delivery.reject().await;
                Err(PipelineError::LockContention { key })
            }
            Err(err) => {
                error!(
                    key = %key,
                    tx_id = %self.event.tx.id,
                    error = %err,
                    "consumer lock obtain failed"
                );
                self.delivery.reject().await;
                Err(PipelineError::Lock { key, source: err })
            }
        }
    }

    /// Replaces the event snapshot with the stored tx, discarding stale deliveries.
    pub(super) async fn check_tx(&mut self) -> PipelineResult {
        let tx_id = self.event.tx.id;

        let stored = match self.config.repository.transaction(tx_id).await {
            Ok(tx) => tx,
            Err(err) => {
                error!(tx_id = %tx_id, error = %err, "can't get transaction from repository");
                self.delivery.ack().await;
                return Err(PipelineError::TransactionLookup(err));
            }
        };

        if stored.id != tx_id || stored.state != self.state.name() {
            error!(
                tx_id = %tx_id,
                event_id = %self.event.id,
                current_state = %stored.state,
                expected_state = %self.state.name(),
                "transaction state incompatible"
            );
            self.delivery.ack().await;
            return Err(PipelineError::StateMismatch {
                tx_id,
                expected: self.state.name().to_string(),
                actual: stored.state,
            });
        }

        self.event.tx = stored;
        Ok(())
    }

    /// Opens the event span as a child of the trace stored on the tx.
    pub(super) fn start_tracing(&mut self) {
        let parent = TraceContext::parse(&self.event.tx.trace_id, &self.event.tx.span_id);
        let context = parent
            .map(|parent| parent.child())
            .unwrap_or_else(TraceContext::new_root);

        let span = info_span!(
            "fsm.event",
            state = %self.state.name(),
            queue = %self.state.queue(),
            event_id = %self.event.id,
            tx_id = %self.event.tx.id,
            retry_n = self.event.retry_n,
            trace_id = %context.trace_id(),
            span_id = %context.span_id(),
        );
        if let Some(parent) = parent {
            parent.link(&span);
        }

        self.span = span;
        self.trace = Some(context);
    }

    pub(super) async fn update_progress_event(&mut self) {
        let span = self.step_span("update_progress_event");
        async {
            self.event.set_status(EventStatus::Progress);
            if let Some(context) = self.trace {
                self.event.span_id = context.span_id();
            }

            if let Err(err) = self.config.repository.update_event(&self.event).await {
                warn!(error = %err, "event update error");
            }
        }
        .instrument(span)
        .await
    }

    pub(super) async fn update_progress_tx(&mut self) -> PipelineResult {
        let span = self.step_span("update_progress_tx");
        async {
            self.event.tx.status = TxStatus::Progress;
            self.event.tx.touch();

            let expected = self.event.tx.state.clone();
            if let Err(err) = self
                .config
                .repository
                .update_transaction(&self.event.tx, &expected)
                .await
            {
                error!(error = %err, "tx status update error");
                self.delivery.reject().await;
                return Err(PipelineError::ProgressUpdate(err));
            }

            trace!("tx marked in progress");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
