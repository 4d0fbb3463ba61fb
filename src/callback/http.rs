//! # HTTP Callback Manager
//!
//! Reliable delivery of completion callbacks.
//!
//! ## Delivery flow
//!
//! 1. `send` validates the callback URL and serializes the transaction once
//! 2. Up to `sync_retry_count` attempts run on the caller's task, spaced by
//!    `sync_retry_delay`; every attempt is persisted before and after the request
//! 3. If all of them failed, the next attempt is persisted and published to
//!    the callback queue and `send` returns
//! 4. The queue consumer waits until `async_retry_delay` has passed since the
//!    previous request, tries once, persists the result and either stops
//!    (delivered, or `sync_retry_count + async_retry_count` attempts made) or
//!    publishes the next attempt
//!
//! Queue deliveries are always acknowledged: the attempt counter, not broker
//! redelivery, bounds the retries.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::client::{CallbackClient, ReqwestCallbackClient};
use super::event::CallbackEvent;
use super::{CallbackError, CallbackManager, CallbackRepository};
use crate::config::CallbackConfig;
use crate::model::Tx;
use crate::queue::{delivery_handler, Broker, Channel, Delivery};

pub struct HttpCallbackManager {
    dispatcher: Arc<CallbackDispatcher>,
    pull: Arc<dyn Channel>,
}

impl HttpCallbackManager {
    /// Declares the callback queue and starts its consumer.
    pub async fn start(
        config: CallbackConfig,
        repository: Arc<dyn CallbackRepository>,
        broker: Arc<dyn Broker>,
        client: Arc<dyn CallbackClient>,
    ) -> Result<Self, CallbackError> {
        config.validate()?;

        let push = broker.channel().await?;
        push.declare_queue(&config.queue_name).await?;

        let dispatcher = Arc::new(CallbackDispatcher {
            config,
            repository,
            client,
            push,
        });

        let pull = broker.channel().await?;
        let worker = Arc::clone(&dispatcher);
        pull.consume(
            &dispatcher.config.queue_name,
            delivery_handler(move |delivery| {
                let worker = Arc::clone(&worker);
                async move { worker.process_queued(delivery).await }
            }),
        )
        .await?;

        info!(
            queue = %dispatcher.config.queue_name,
            sync_attempts = dispatcher.config.sync_retry_count,
            async_attempts = dispatcher.config.async_retry_count,
            "HTTP callback manager started"
        );

        Ok(Self { dispatcher, pull })
    }

    /// [`Self::start`] with the `reqwest` client built from `config`.
    pub async fn with_reqwest(
        config: CallbackConfig,
        repository: Arc<dyn CallbackRepository>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, CallbackError> {
        let client = Arc::new(ReqwestCallbackClient::new(&config)?);
        Self::start(config, repository, broker, client).await
    }

    pub fn config(&self) -> &CallbackConfig {
        &self.dispatcher.config
    }
}

impl std::fmt::Debug for HttpCallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCallbackManager")
            .field("config", &self.dispatcher.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CallbackManager for HttpCallbackManager {
    #[instrument(skip_all, name = "fsm.callback.send", fields(tx_id = %tx.id))]
    async fn send(&self, tx: &Tx) {
        if tx.callback_url.is_empty() {
            return;
        }

        let event = match prepare_request(tx) {
            Ok(event) => event,
            Err(err) => {
                error!(tx_id = %tx.id, error = %err, "can't prepare callback request");
                return;
            }
        };

        self.dispatcher.deliver_sync(event).await;
    }

    async fn stop(&self) -> Result<(), CallbackError> {
        self.pull.close().await?;
        debug!(queue = %self.dispatcher.config.queue_name, "callback consumer stopped");
        Ok(())
    }
}

/// First attempt for `tx`: validated URL plus the JSON snapshot.
fn prepare_request(tx: &Tx) -> Result<CallbackEvent, CallbackError> {
    let url = reqwest::Url::parse(&tx.callback_url)
        .map_err(|e| CallbackError::invalid_url(&tx.callback_url, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CallbackError::invalid_url(
                &tx.callback_url,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }

    let body = serde_json::to_vec(tx)?;
    Ok(CallbackEvent::new(tx.id, url.to_string(), body))
}

struct CallbackDispatcher {
    config: CallbackConfig,
    repository: Arc<dyn CallbackRepository>,
    client: Arc<dyn CallbackClient>,
    push: Arc<dyn Channel>,
}

impl CallbackDispatcher {
    async fn deliver_sync(&self, mut event: CallbackEvent) {
        let attempts = self.config.sync_retry_count;

        for attempt in 1..=attempts {
            self.persist(&event, "before send").await;
            self.attempt(&mut event).await;
            self.persist(&event, "after send").await;

            if event.sent_successfully {
                return;
            }

            event = event.new_retry();
            if attempt < attempts {
                tokio::time::sleep(self.config.sync_retry_delay()).await;
            }
        }

        self.persist(&event, "before push to queue").await;
        self.push_to_queue(&event).await;
    }

    async fn process_queued(&self, delivery: Box<dyn Delivery>) {
        let mut event = match CallbackEvent::decode(delivery.body()) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "can't decode callback event");
                delivery.ack().await;
                return;
            }
        };

        let wait = event.remaining_delay(self.config.async_retry_delay());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        self.attempt(&mut event).await;
        self.persist(&event, "after send in queue").await;

        if event.sent_successfully {
            delivery.ack().await;
            return;
        }

        if event.retry_n >= self.config.total_attempts() {
            warn!(
                tx_id = %event.tx_id,
                callback_id = %event.id,
                retry_n = event.retry_n,
                url = %event.request_url,
                "callback delivery attempts exhausted"
            );
            delivery.ack().await;
            return;
        }

        let next = event.new_retry();
        self.persist(&next, "before push to queue").await;
        self.push_to_queue(&next).await;

        delivery.ack().await;
    }

    #[instrument(skip_all, name = "fsm.callback.attempt", fields(callback_id = %event.id, retry_n = event.retry_n))]
    async fn attempt(&self, event: &mut CallbackEvent) {
        event.mark_sent();

        match self.client.post(&event.request_url, &event.request_body).await {
            Ok(response) => {
                event.record_response(response.status, response.body);
                if !event.sent_successfully {
                    warn!(
                        tx_id = %event.tx_id,
                        status = response.status,
                        url = %event.request_url,
                        "callback rejected by receiver"
                    );
                }
            }
            Err(err) => {
                warn!(
                    tx_id = %event.tx_id,
                    url = %event.request_url,
                    error = %err,
                    "callback request failed"
                );
                event.record_transport_failure(&err.to_string());
            }
        }
    }

    async fn persist(&self, event: &CallbackEvent, stage: &str) {
        if let Err(err) = self.repository.update_callback_event(event).await {
            error!(
                tx_id = %event.tx_id,
                callback_id = %event.id,
                stage,
                error = %err,
                "can't update callback event"
            );
        }
    }

    async fn push_to_queue(&self, event: &CallbackEvent) {
        match event.encode() {
            Ok(body) => self.push.publish(&self.config.queue_name, body).await,
            Err(err) => error!(
                tx_id = %event.tx_id,
                callback_id = %event.id,
                error = %err,
                "callback event can't be encoded"
            ),
        }
    }
}
