//! Canonical identity record and the response transformer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized profile record for the signed-in principal.
///
/// Immutable once constructed: a new `Identity` replaces the old one, it is
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub onboarding_completed: bool,
    pub onboarding_step: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Build an identity from any server response shape.
    ///
    /// Accepts either a payload with a nested `user` object or a flat
    /// record. Absent optional fields become `None`; absent flags default
    /// to false. Never errors.
    pub fn from_payload(raw: &Value) -> Self {
        let record = raw
            .get("user")
            .filter(|v| v.is_object())
            .unwrap_or(raw);

        Self {
            id: string_field(record, "id"),
            email: string_field(record, "email"),
            is_active: bool_field(record, "is_active"),
            is_verified: bool_field(record, "is_verified"),
            is_superuser: bool_field(record, "is_superuser"),
            first_name: optional_string(record, "first_name"),
            last_name: optional_string(record, "last_name"),
            phone: optional_string(record, "phone"),
            company: optional_string(record, "company"),
            onboarding_completed: bool_field(record, "onboarding_completed"),
            onboarding_step: record
                .get("onboarding_step")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            created_at: timestamp_field(record, "created_at"),
            updated_at: timestamp_field(record, "updated_at"),
        }
    }

    /// True when the record carries a usable identifier.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

fn string_field(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        // Some backends serialize numeric ids.
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_string(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn bool_field(record: &Value, key: &str) -> bool {
    record.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn timestamp_field(record: &Value, key: &str) -> Option<DateTime<Utc>> {
    record
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
