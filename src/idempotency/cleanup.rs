use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::idempotency::store::RecordStore;

/// Periodically purges expired records from stores without native expiry.
pub struct IdempotencyCleanupJob {
    store: Arc<dyn RecordStore>,
    interval: Duration,
}

impl IdempotencyCleanupJob {
    pub fn new(store: Arc<dyn RecordStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        self.store.purge_expired().await
    }

    /// Starts the cleanup job in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!(
                                backend = self.store.backend_name(),
                                "Cleaned up {} expired idempotency records",
                                count
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::store::AcquireResult;
    use crate::idempotency::InMemoryRecordStore;

    #[tokio::test]
    async fn test_run_once_purges_expired_leases() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.try_acquire("short", Duration::from_millis(10)).await.unwrap();
        store.try_acquire("long", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let job = IdempotencyCleanupJob::new(store.clone(), Duration::from_secs(60));
        assert_eq!(job.run_once().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);

        let again = store.try_acquire("short", Duration::from_secs(1)).await.unwrap();
        assert!(matches!(again, AcquireResult::Acquired(_)));
    }
}
