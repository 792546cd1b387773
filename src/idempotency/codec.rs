//! Serialization of cached outcomes and of records in their flat wire form.
//!
//! Networked stores keep a record as a flat list of string fields:
//!
//! ```text
//! state      PENDING | COMPLETED
//! owner      owner token (uuid)
//! created_at unix millis
//! expires_at unix millis
//! status     status code        (completed only)
//! payload    JSON-encoded body  (completed only)
//! ```

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::idempotency::record::{IdempotencyRecord, OwnerToken, Outcome, RecordState};

pub const FIELD_STATE: &str = "state";
pub const FIELD_OWNER: &str = "owner";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_EXPIRES_AT: &str = "expires_at";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_PAYLOAD: &str = "payload";

/// JSON codec for outcomes and records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultCodec;

impl ResultCodec {
    pub fn new() -> Self {
        Self
    }

    /// Wraps a typed response body into a cacheable outcome.
    pub fn encode<T: Serialize>(&self, status_code: u16, body: &T) -> Result<Outcome> {
        let payload = serde_json::to_value(body)?;
        Ok(Outcome::new(status_code, payload))
    }

    /// Reads a typed body back out of a cached outcome.
    pub fn decode<T: DeserializeOwned>(&self, outcome: &Outcome) -> Result<T> {
        Ok(serde_json::from_value(outcome.payload.clone())?)
    }

    pub fn encode_payload(&self, payload: &serde_json::Value) -> Result<String> {
        Ok(serde_json::to_string(payload)?)
    }

    pub fn decode_payload(&self, raw: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Flattens a record into wire fields.
    pub fn record_to_fields(&self, record: &IdempotencyRecord) -> Result<Vec<(&'static str, String)>> {
        let mut fields = vec![
            (FIELD_STATE, record.state.as_str().to_string()),
            (FIELD_OWNER, record.owner_token.to_string()),
            (FIELD_CREATED_AT, record.created_at.timestamp_millis().to_string()),
            (FIELD_EXPIRES_AT, record.expires_at.timestamp_millis().to_string()),
        ];

        if let Some(outcome) = record.outcome() {
            fields.push((FIELD_STATUS, outcome.status_code.to_string()));
            fields.push((FIELD_PAYLOAD, self.encode_payload(&outcome.payload)?));
        }

        Ok(fields)
    }

    /// Rebuilds a record from wire fields. An empty field list means the
    /// key is absent.
    pub fn record_from_fields(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
    ) -> Result<Option<IdempotencyRecord>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let fields: HashMap<String, String> = fields.into_iter().collect();

        let state = required(&fields, FIELD_STATE)
            .and_then(|raw| RecordState::parse(raw).ok_or_else(|| corrupt(key, FIELD_STATE)))?;
        let owner_token = required(&fields, FIELD_OWNER)
            .and_then(|raw| OwnerToken::parse(raw).ok_or_else(|| corrupt(key, FIELD_OWNER)))?;
        let created_at = timestamp(key, &fields, FIELD_CREATED_AT)?;
        let expires_at = timestamp(key, &fields, FIELD_EXPIRES_AT)?;

        let (status_code, payload) = match state {
            RecordState::Pending => (None, None),
            RecordState::Completed => {
                let status = required(&fields, FIELD_STATUS)?
                    .parse::<u16>()
                    .map_err(|_| corrupt(key, FIELD_STATUS))?;
                let payload = match fields.get(FIELD_PAYLOAD) {
                    Some(raw) => self.decode_payload(raw)?,
                    None => serde_json::Value::Null,
                };
                (Some(status), Some(payload))
            }
        };

        Ok(Some(IdempotencyRecord {
            key: key.to_string(),
            state,
            owner_token,
            status_code,
            payload,
            created_at,
            expires_at,
        }))
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::Internal(anyhow!("Idempotency record is missing field '{}'", name)))
}

fn timestamp(key: &str, fields: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>> {
    let millis = required(fields, name)?
        .parse::<i64>()
        .map_err(|_| corrupt(key, name))?;
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| corrupt(key, name))
}

fn corrupt(key: &str, field: &str) -> AppError {
    AppError::Internal(anyhow!(
        "Idempotency record '{}' has a malformed '{}' field",
        key,
        field
    ))
}
