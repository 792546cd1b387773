use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a live idempotency record. Absence is modelled by
/// the store returning no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordState {
    Pending,
    Completed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Pending => "PENDING",
            RecordState::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RecordState::Pending),
            "COMPLETED" => Some(RecordState::Completed),
            _ => None,
        }
    }
}

/// Opaque token identifying the lease holder of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a guarded operation: a status code plus a payload that is
/// replayed verbatim. `Value::Null` means an empty body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status_code: u16,
    pub payload: serde_json::Value,
}

impl Outcome {
    pub fn new(status_code: u16, payload: serde_json::Value) -> Self {
        Self {
            status_code,
            payload,
        }
    }

    pub fn empty(status_code: u16) -> Self {
        Self::new(status_code, serde_json::Value::Null)
    }

    pub fn has_body(&self) -> bool {
        !self.payload.is_null()
    }
}

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub state: RecordState,
    pub owner_token: OwnerToken,
    pub status_code: Option<u16>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A fresh lease owned by a new token.
    pub fn pending(key: impl Into<String>, lease: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            state: RecordState::Pending,
            owner_token: OwnerToken::new(),
            status_code: None,
            payload: None,
            created_at: now,
            expires_at: now + chrono_duration(lease),
        }
    }

    /// Moves the record to `Completed` and restarts its validity window.
    pub fn complete(&mut self, outcome: &Outcome, result_ttl: Duration) {
        self.state = RecordState::Completed;
        self.status_code = Some(outcome.status_code);
        self.payload = Some(outcome.payload.clone());
        self.expires_at = Utc::now() + chrono_duration(result_ttl);
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_pending(&self) -> bool {
        self.state == RecordState::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.state == RecordState::Completed
    }

    pub fn is_owned_by(&self, owner: &OwnerToken) -> bool {
        self.owner_token == *owner
    }

    /// The cached outcome; only present once completed.
    pub fn outcome(&self) -> Option<Outcome> {
        match (self.state, self.status_code) {
            (RecordState::Completed, Some(status_code)) => Some(Outcome::new(
                status_code,
                self.payload.clone().unwrap_or(serde_json::Value::Null),
            )),
            _ => None,
        }
    }
}

/// Converts a std duration, saturating at a century for absurd values.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
