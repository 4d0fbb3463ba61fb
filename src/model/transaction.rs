//! # Transactions
//!
//! [`Tx`] is the durable unit of work moved through a model. The repository is
//! its source of truth; a snapshot travels inside every [`super::Event`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::ModelError;

/// JSON field names owned by [`Tx`]. Attributes share the object with them.
pub const RESERVED_TX_FIELDS: [&str; 8] = [
    "tx_id",
    "state",
    "status",
    "trace_id",
    "span_id",
    "callback_url",
    "created",
    "updated",
];

/// Whether `key` names a transaction field rather than a business attribute.
pub fn is_reserved_attribute(key: &str) -> bool {
    RESERVED_TX_FIELDS.contains(&key)
}

/// Rejects attribute keys that would be emitted twice on the wire.
pub(crate) fn check_attribute_key(key: &str) -> Result<(), ModelError> {
    if is_reserved_attribute(key) {
        return Err(ModelError::reserved_attribute(key));
    }
    Ok(())
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Waiting in a state queue.
    #[default]
    Pending,
    /// Being processed by a consumer right now.
    Progress,
    /// Stopped after exhausting the retry budget of a state.
    Error,
    /// Reached a state whose handler returned no next state.
    Done,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Progress => "progress",
            TxStatus::Error => "error",
            TxStatus::Done => "done",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction snapshot.
///
/// `state` holds the name of the current state of the owning model; it is
/// empty until the transaction is created through the engine. Business
/// fields live in `attributes` and are flattened into the JSON object, so
/// they are written only through the checked setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    #[serde(rename = "tx_id")]
    pub id: Uuid,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: TxStatus,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
    #[serde(flatten)]
    pub(crate) attributes: Map<String, Value>,
}

impl Tx {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: String::new(),
            status: TxStatus::Pending,
            trace_id: String::new(),
            span_id: String::new(),
            callback_url: String::new(),
            created: now,
            updated: now,
            attributes: Map::new(),
        }
    }

    /// New transaction with a random id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = url.into();
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, ModelError> {
        self.set_attribute(key, value)?;
        Ok(self)
    }

    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        let key = key.into();
        check_attribute_key(&key)?;
        self.attributes.insert(key, value.into());
        Ok(())
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Typed view of a business attribute. `None` when absent or of another shape.
    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub(crate) fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let tx = Tx::generate()
            .with_callback_url("http://localhost/cb")
            .with_attribute("amount", 1250)
            .unwrap();

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["tx_id"], Value::String(tx.id.to_string()));
        assert_eq!(json["status"], "pending");
        assert_eq!(json["callback_url"], "http://localhost/cb");
        assert_eq!(json["amount"], 1250);
        assert!(json.get("attributes").is_none());
    }

    #[test]
    fn test_unknown_fields_become_attributes() {
        let id = Uuid::new_v4();
        let raw = serde_json::json!({
            "tx_id": id,
            "state": "NEW",
            "status": "progress",
            "currency": "EUR",
        });

        let tx: Tx = serde_json::from_value(raw).unwrap();
        assert_eq!(tx.id, id);
        assert_eq!(tx.state, "NEW");
        assert_eq!(tx.status, TxStatus::Progress);
        assert_eq!(tx.attribute::<String>("currency").as_deref(), Some("EUR"));
        assert_eq!(tx.attribute::<u64>("currency"), None);
    }

    #[test]
    fn test_reserved_field_names_are_not_attributes() {
        let mut tx = Tx::generate();
        for field in RESERVED_TX_FIELDS {
            let err = tx.set_attribute(field, "authorized").unwrap_err();
            assert_eq!(err, ModelError::reserved_attribute(field));
        }
        assert!(tx.attributes().is_empty());
        assert!(Tx::generate().with_attribute("status", "authorized").is_err());

        tx.set_attribute("payment_status", "authorized").unwrap();
        let decoded: Tx = serde_json::from_str(&serde_json::to_string(&tx).unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.status, TxStatus::Pending);
    }
}
