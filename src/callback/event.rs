//! Record of one attempt to deliver a completion callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::callback::TRANSPORT_FAILURE_CODE;
use crate::constants::ids::{CALLBACK_ID_PREFIX, CALLBACK_RETRY_BYTE};
use crate::model::pretty_id::pretty_uuid;

/// One delivery attempt. A retry is a new record with a new id; the request
/// payload is shared by all attempts of the same callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub id: Uuid,
    pub tx_id: Uuid,
    pub request_url: String,
    #[serde(with = "base64_bytes")]
    pub request_body: Vec<u8>,
    /// Time the most recent request was sent.
    #[serde(default)]
    pub request_timestamp: Option<DateTime<Utc>>,
    /// HTTP status, or `-1` when the request never got a response.
    #[serde(default)]
    pub response_code: i32,
    #[serde(default, with = "base64_bytes")]
    pub response_body: Vec<u8>,
    /// Attempt number, counted from 1.
    pub retry_n: u32,
    #[serde(default)]
    pub sent_successfully: bool,
}

impl CallbackEvent {
    /// First attempt for `tx_id`.
    pub fn new(tx_id: Uuid, request_url: impl Into<String>, request_body: Vec<u8>) -> Self {
        Self {
            id: callback_event_id(1),
            tx_id,
            request_url: request_url.into(),
            request_body,
            request_timestamp: None,
            response_code: 0,
            response_body: Vec::new(),
            retry_n: 1,
            sent_successfully: false,
        }
    }

    /// Next attempt: same request and timestamp, fresh id and outcome.
    pub fn new_retry(&self) -> Self {
        let retry_n = self.retry_n + 1;
        let mut id = *self.id.as_bytes();
        id[CALLBACK_RETRY_BYTE] = retry_byte(retry_n);

        Self {
            id: Uuid::from_bytes(id),
            tx_id: self.tx_id,
            request_url: self.request_url.clone(),
            request_body: self.request_body.clone(),
            request_timestamp: self.request_timestamp,
            response_code: 0,
            response_body: Vec::new(),
            retry_n,
            sent_successfully: false,
        }
    }

    pub(crate) fn mark_sent(&mut self) {
        self.request_timestamp = Some(Utc::now());
    }

    /// Any status below 300 counts as delivered.
    pub(crate) fn record_response(&mut self, status: u16, body: Vec<u8>) {
        self.response_code = i32::from(status);
        self.response_body = body;
        self.sent_successfully = status < 300;
    }

    pub(crate) fn record_transport_failure(&mut self, error: &str) {
        self.response_code = TRANSPORT_FAILURE_CODE;
        self.response_body = error.as_bytes().to_vec();
        self.sent_successfully = false;
    }

    /// Time left until `delay` has passed since the last request.
    pub fn remaining_delay(&self, delay: Duration) -> Duration {
        let Some(sent_at) = self.request_timestamp else {
            return Duration::ZERO;
        };
        let elapsed = (Utc::now() - sent_at).to_std().unwrap_or_default();
        delay.saturating_sub(elapsed)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// `CABAnn..` id where `nn` is the attempt number.
pub fn callback_event_id(retry_n: u32) -> Uuid {
    let mut id = *pretty_uuid(&CALLBACK_ID_PREFIX).as_bytes();
    id[CALLBACK_RETRY_BYTE] = retry_byte(retry_n);
    Uuid::from_bytes(id)
}

fn retry_byte(retry_n: u32) -> u8 {
    u8::try_from(retry_n).unwrap_or(u8::MAX)
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pretty_id::has_prefix;

    #[test]
    fn test_first_attempt() {
        let tx_id = Uuid::new_v4();
        let event = CallbackEvent::new(tx_id, "http://localhost/cb", b"{}".to_vec());

        assert!(has_prefix(&event.id, &[0xCA, 0xBA, 0x01]));
        assert_eq!(event.retry_n, 1);
        assert_eq!(event.tx_id, tx_id);
        assert!(!event.sent_successfully);
        assert!(event.request_timestamp.is_none());
    }

    #[test]
    fn test_retry_keeps_request_and_clears_outcome() {
        let mut first = CallbackEvent::new(Uuid::new_v4(), "http://localhost/cb", b"{}".to_vec());
        first.mark_sent();
        first.record_response(503, b"busy".to_vec());

        let second = first.new_retry();

        assert_eq!(second.retry_n, 2);
        assert_ne!(second.id, first.id);
        assert_eq!(second.id.as_bytes()[CALLBACK_RETRY_BYTE], 2);
        assert_eq!(second.id.as_bytes()[3..], first.id.as_bytes()[3..]);
        assert_eq!(second.request_body, first.request_body);
        assert_eq!(second.request_timestamp, first.request_timestamp);
        assert_eq!(second.response_code, 0);
        assert!(second.response_body.is_empty());
    }

    #[test]
    fn test_outcome_recording() {
        let mut event = CallbackEvent::new(Uuid::new_v4(), "http://localhost/cb", Vec::new());

        event.record_response(204, Vec::new());
        assert!(event.sent_successfully);

        event.record_response(302, b"moved".to_vec());
        assert!(!event.sent_successfully);
        assert_eq!(event.response_code, 302);

        event.record_transport_failure("connection refused");
        assert_eq!(event.response_code, -1);
        assert_eq!(event.response_body, b"connection refused");
    }

    #[test]
    fn test_bytes_travel_as_base64() {
        let event = CallbackEvent::new(Uuid::new_v4(), "http://localhost/cb", b"{\"a\":1}".to_vec());
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();

        assert_eq!(json["request_body"], "eyJhIjoxfQ==");
        assert_eq!(CallbackEvent::decode(&event.encode().unwrap()).unwrap(), event);
    }

    #[test]
    fn test_remaining_delay() {
        let mut event = CallbackEvent::new(Uuid::new_v4(), "http://localhost/cb", Vec::new());
        assert_eq!(event.remaining_delay(Duration::from_secs(10)), Duration::ZERO);

        event.mark_sent();
        let remaining = event.remaining_delay(Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
        assert!(remaining <= Duration::from_secs(10));
    }
}
