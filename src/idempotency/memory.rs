//! In-process record store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::idempotency::record::{IdempotencyRecord, OwnerToken, Outcome};
use crate::idempotency::store::{AcquireResult, FinalizeResult, RecordStore};

/// Record store backed by a mutex-guarded map.
///
/// Every operation runs entirely under the lock, so check-and-set steps are
/// atomic with respect to other callers. Expired entries stay in the map
/// until they are overwritten or purged, but are never visible.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn live<'a>(
    records: &'a mut HashMap<String, IdempotencyRecord>,
    key: &str,
) -> Option<&'a mut IdempotencyRecord> {
    let now = Utc::now();
    records.get_mut(key).filter(|record| !record.is_expired_at(now))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<AcquireResult> {
        let mut records = self.records.lock().await;

        if let Some(existing) = live(&mut records, key) {
            return Ok(AcquireResult::Conflict(existing.clone()));
        }

        let record = IdempotencyRecord::pending(key, lease);
        let owner = record.owner_token;
        records.insert(key.to_string(), record);
        Ok(AcquireResult::Acquired(owner))
    }

    async fn complete(
        &self,
        key: &str,
        owner: &OwnerToken,
        outcome: &Outcome,
        result_ttl: Duration,
    ) -> Result<FinalizeResult> {
        let mut records = self.records.lock().await;

        match live(&mut records, key) {
            Some(record) if record.is_owned_by(owner) && record.is_pending() => {
                record.complete(outcome, result_ttl);
                Ok(FinalizeResult::Applied)
            }
            _ => Ok(FinalizeResult::StaleOwner),
        }
    }

    async fn release(&self, key: &str, owner: &OwnerToken) -> Result<FinalizeResult> {
        let mut records = self.records.lock().await;

        match records.get(key) {
            Some(record) if record.is_owned_by(owner) => {
                let expired = record.is_expired();
                records.remove(key);
                if expired {
                    Ok(FinalizeResult::StaleOwner)
                } else {
                    Ok(FinalizeResult::Applied)
                }
            }
            _ => Ok(FinalizeResult::StaleOwner),
        }
    }

    async fn force_replace(&self, key: &str, lease: Duration) -> Result<OwnerToken> {
        let mut records = self.records.lock().await;

        let record = IdempotencyRecord::pending(key, lease);
        let owner = record.owner_token;
        records.insert(key.to_string(), record);
        Ok(owner)
    }

    async fn read(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut records = self.records.lock().await;
        Ok(live(&mut records, key).cloned())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(30);

    fn acquired(result: AcquireResult) -> OwnerToken {
        match result {
            AcquireResult::Acquired(owner) => owner,
            AcquireResult::Conflict(record) => panic!("unexpected conflict: {:?}", record),
        }
    }

    #[tokio::test]
    async fn test_acquire_then_conflict() {
        let store = InMemoryRecordStore::new();
        let owner = acquired(store.try_acquire("k", LEASE).await.unwrap());

        match store.try_acquire("k", LEASE).await.unwrap() {
            AcquireResult::Conflict(existing) => {
                assert!(existing.is_pending());
                assert_eq!(existing.owner_token, owner);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_requires_owner() {
        let store = InMemoryRecordStore::new();
        let owner = acquired(store.try_acquire("k", LEASE).await.unwrap());
        let outcome = Outcome::new(200, json!({"id": 1}));

        let stale = store
            .complete("k", &OwnerToken::new(), &outcome, LEASE)
            .await
            .unwrap();
        assert_eq!(stale, FinalizeResult::StaleOwner);
        assert!(store.read("k").await.unwrap().unwrap().is_pending());

        let applied = store.complete("k", &owner, &outcome, LEASE).await.unwrap();
        assert!(applied.is_applied());
        let record = store.read("k").await.unwrap().unwrap();
        assert_eq!(record.outcome(), Some(outcome));
    }

    #[tokio::test]
    async fn test_completed_record_is_immutable() {
        let store = InMemoryRecordStore::new();
        let owner = acquired(store.try_acquire("k", LEASE).await.unwrap());
        let first = Outcome::new(200, json!({"n": 1}));
        store.complete("k", &owner, &first, LEASE).await.unwrap();

        let again = store
            .complete("k", &owner, &Outcome::new(200, json!({"n": 2})), LEASE)
            .await
            .unwrap();
        assert_eq!(again, FinalizeResult::StaleOwner);
        assert_eq!(store.read("k").await.unwrap().unwrap().outcome(), Some(first));
    }

    #[tokio::test]
    async fn test_release_frees_key() {
        let store = InMemoryRecordStore::new();
        let owner = acquired(store.try_acquire("k", LEASE).await.unwrap());

        assert_eq!(
            store.release("k", &OwnerToken::new()).await.unwrap(),
            FinalizeResult::StaleOwner
        );
        assert!(store.release("k", &owner).await.unwrap().is_applied());
        assert!(store.read("k").await.unwrap().is_none());
        acquired(store.try_acquire("k", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = InMemoryRecordStore::new();
        let stale_owner = acquired(store.try_acquire("k", Duration::from_millis(20)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.read("k").await.unwrap().is_none());

        let new_owner = acquired(store.try_acquire("k", LEASE).await.unwrap());
        assert_ne!(new_owner, stale_owner);

        let outcome = Outcome::empty(204);
        assert_eq!(
            store.complete("k", &stale_owner, &outcome, LEASE).await.unwrap(),
            FinalizeResult::StaleOwner
        );
        assert_eq!(
            store.release("k", &stale_owner).await.unwrap(),
            FinalizeResult::StaleOwner
        );
        assert!(store.read("k").await.unwrap().unwrap().is_owned_by(&new_owner));
    }

    #[tokio::test]
    async fn test_force_replace_overwrites_completed() {
        let store = InMemoryRecordStore::new();
        let owner = acquired(store.try_acquire("k", LEASE).await.unwrap());
        store
            .complete("k", &owner, &Outcome::new(200, json!("old")), LEASE)
            .await
            .unwrap();

        let forced = store.force_replace("k", LEASE).await.unwrap();
        let record = store.read("k").await.unwrap().unwrap();
        assert!(record.is_pending());
        assert!(record.is_owned_by(&forced));
        assert_eq!(
            store.complete("k", &owner, &Outcome::empty(200), LEASE).await.unwrap(),
            FinalizeResult::StaleOwner
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryRecordStore::new();
        acquired(store.try_acquire("short", Duration::from_millis(10)).await.unwrap());
        acquired(store.try_acquire("long", LEASE).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_acquires_have_one_winner() {
        let store = Arc::new(InMemoryRecordStore::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.try_acquire("race", LEASE).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if let AcquireResult::Acquired(_) = handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
