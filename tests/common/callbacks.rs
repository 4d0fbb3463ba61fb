//! Callback doubles: a manager that records sends and a scripted HTTP client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use fsm_engine::callback::{CallbackClient, CallbackError, CallbackManager, CallbackResponse};
use fsm_engine::model::Tx;

/// Remembers every transaction handed over for notification.
#[derive(Debug, Default)]
pub struct RecordingCallbackManager {
    sent: Mutex<Vec<Tx>>,
    stops: AtomicUsize,
}

impl RecordingCallbackManager {
    pub fn sent(&self) -> Vec<Tx> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallbackManager for RecordingCallbackManager {
    async fn send(&self, tx: &Tx) {
        self.sent.lock().push(tx.clone());
    }

    async fn stop(&self) -> Result<(), CallbackError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Outcome of one scripted request.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(u16),
    Unreachable,
}

/// Answers from a script, then repeats `fallback` forever.
#[derive(Debug)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    requests: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedClient {
    pub fn new(script: impl IntoIterator<Item = Scripted>, fallback: Scripted) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(outcome: Scripted) -> Self {
        Self::new([], outcome)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<(String, Vec<u8>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CallbackClient for ScriptedClient {
    async fn post(&self, url: &str, body: &[u8]) -> Result<CallbackResponse, CallbackError> {
        self.requests.lock().push((url.to_string(), body.to_vec()));

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Scripted::Status(status) => Ok(CallbackResponse {
                status,
                body: format!("status {status}").into_bytes(),
            }),
            Scripted::Unreachable => Err(CallbackError::transport("connection refused")),
        }
    }
}
