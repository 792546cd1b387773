use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::idempotency::record::{IdempotencyRecord, OwnerToken, Outcome};

/// Result of trying to claim a key.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireResult {
    /// The caller now holds the lease.
    Acquired(OwnerToken),
    /// A live record already exists for the key.
    Conflict(IdempotencyRecord),
}

/// Result of an owner-checked mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeResult {
    Applied,
    /// The record is gone or now belongs to another lease holder; nothing
    /// was changed.
    StaleOwner,
}

impl FinalizeResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, FinalizeResult::Applied)
    }
}

/// Shared key-value store for idempotency records.
///
/// Every mutating operation must be a single indivisible step against the
/// backing store. A record whose `expires_at` has passed is treated as
/// absent by all operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates a `Pending` record with a fresh owner token iff no live record
    /// exists for `key`. Exactly one of several racing callers wins.
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<AcquireResult>;

    /// `Pending -> Completed` with a new expiry of `result_ttl`, only when
    /// `owner` still holds the lease.
    async fn complete(
        &self,
        key: &str,
        owner: &OwnerToken,
        outcome: &Outcome,
        result_ttl: Duration,
    ) -> Result<FinalizeResult>;

    /// Removes the record iff it is owned by `owner`.
    async fn release(&self, key: &str, owner: &OwnerToken) -> Result<FinalizeResult>;

    /// Unconditionally replaces whatever exists for `key` with a fresh
    /// `Pending` lease.
    async fn force_replace(&self, key: &str, lease: Duration) -> Result<OwnerToken>;

    /// Non-mutating lookup of the live record.
    async fn read(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Drops expired records. Stores with native expiry have nothing to do.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Connectivity probe used by health checks.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}
