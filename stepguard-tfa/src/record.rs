//! Stored method records and their options payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stepguard_core::KeyRegistration;

/// One stored two-factor method instance owned by a user.
///
/// By convention one record holds one physical security key, though the
/// data model does not forbid more. Records are created when a user begins
/// setup and deleted by account management, outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Method discriminator, e.g. `"u2f"`.
    pub method: String,
    /// User-chosen label for this record.
    pub title: String,
    /// Method-specific payload; decode through [`MethodOptions::decode`].
    pub options: Value,
    pub created_at: DateTime<Utc>,
}

impl MethodRecord {
    /// A fresh record with empty options, setup not yet complete.
    pub fn new(user_id: Uuid, method: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            method: method.into(),
            title: title.into(),
            options: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn decode_options(&self) -> MethodOptions {
        MethodOptions::decode(&self.options)
    }
}

/// Decoded `options` payload of a U2F method record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodOptions {
    #[serde(default)]
    pub registrations: Vec<KeyRegistration>,
}

impl MethodOptions {
    /// Tolerant decode. A missing, null or malformed payload yields empty
    /// registrations rather than an error: setup-in-progress is a valid
    /// state, not a parse failure. Accepts both a JSON object and a
    /// string-encoded JSON object (legacy rows store the latter).
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_default(),
            Value::Null => Self::default(),
            other => serde_json::from_value(other.clone()).unwrap_or_default(),
        }
    }

    pub fn to_value(&self) -> Value {
        // Serializing a plain struct with string/number fields cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
