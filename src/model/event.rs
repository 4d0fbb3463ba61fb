//! # Events
//!
//! An [`Event`] is the queue message for one processing attempt of a
//! transaction at one state. Events are never republished: every retry or
//! transition creates a fresh one that inherits the transaction snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::pretty_id::pretty_uuid;
use super::state::State;
use super::transaction::Tx;
use crate::constants::ids::EVENT_ID_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Handler is running.
    Progress,
    /// Handler completed without a fault.
    Done,
    /// Handler faulted; a retry event was produced.
    Retry,
    /// Retry budget exhausted.
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Progress => "progress",
            EventStatus::Done => "done",
            EventStatus::Retry => "retry",
            EventStatus::Error => "error",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tx: Tx,
    #[serde(rename = "event_id")]
    pub id: Uuid,
    pub event_type: String,
    pub start_state: String,
    #[serde(default)]
    pub final_state: String,
    pub status: EventStatus,
    /// Attempt number within the same logical step, counted from 0.
    pub retry_n: u32,
    #[serde(default)]
    pub span_id: String,
    pub updated: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

impl Event {
    /// Fresh pending event addressed to `state`.
    pub fn new(state: &State, tx: Tx, retry_n: u32) -> Self {
        let now = Utc::now();
        Self {
            tx,
            id: pretty_uuid(&EVENT_ID_PREFIX),
            event_type: state.event_type().to_string(),
            start_state: state.name().to_string(),
            final_state: String::new(),
            status: EventStatus::Pending,
            retry_n,
            span_id: String::new(),
            updated: now,
            created: now,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub(crate) fn set_status(&mut self, status: EventStatus) {
        self.status = status;
        self.updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{handler_fn, Model, StateDefinition};

    fn sample_state() -> crate::model::StateRef {
        let model = Model::builder("wire_check")
            .state(
                StateDefinition::new("WIRE_NEW", handler_fn(|_, _| async { Ok(None) }))
                    .initial()
                    .success_final(),
            )
            .build()
            .unwrap();
        model.resolve("WIRE_NEW").unwrap()
    }

    #[test]
    fn test_new_event_defaults() {
        let state = sample_state();
        let tx = Tx::generate();
        let event = Event::new(&state, tx.clone(), 0);

        assert!(event.id.to_string().starts_with("ee00"));
        assert_eq!(event.event_type, "wire_new_event");
        assert_eq!(event.start_state, "WIRE_NEW");
        assert_eq!(event.final_state, "");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_n, 0);
        assert_eq!(event.tx, tx);
    }

    #[test]
    fn test_wire_format_fields() {
        let state = sample_state();
        let event = Event::new(&state, Tx::generate(), 3);
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();

        for field in [
            "tx",
            "event_id",
            "event_type",
            "start_state",
            "final_state",
            "status",
            "retry_n",
            "span_id",
            "updated",
            "created",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["retry_n"], 3);
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Event::decode(b"{not json").is_err());
        assert!(Event::decode(br#"{"event_id": "x"}"#).is_err());
    }
}
