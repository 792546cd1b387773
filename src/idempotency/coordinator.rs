use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::AppError;
use crate::idempotency::key_extractor::{KeyExtractor, KeyNormalizer, KeySource, MissingKey};
use crate::idempotency::record::{IdempotencyRecord, OwnerToken, Outcome, RecordState};
use crate::idempotency::store::{AcquireResult, FinalizeResult, RecordStore};
use crate::observability::{get_metrics, mask_key, LatencyTimer};

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub missing_keys: AtomicU64,
    pub new_requests: AtomicU64,
    pub bypassed_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub in_progress_rejections: AtomicU64,
    pub repeat_rejections: AtomicU64,
    pub completed_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub stale_finalizations: AtomicU64,
    pub store_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        Self::bump(&self.total_requests);
    }

    pub fn record_missing_key(&self) {
        Self::bump(&self.missing_keys);
    }

    pub fn record_new(&self) {
        Self::bump(&self.new_requests);
    }

    pub fn record_bypass(&self) {
        Self::bump(&self.bypassed_requests);
    }

    pub fn record_replay(&self) {
        Self::bump(&self.replayed_requests);
    }

    pub fn record_in_progress(&self) {
        Self::bump(&self.in_progress_rejections);
    }

    pub fn record_repeat_rejected(&self) {
        Self::bump(&self.repeat_rejections);
    }

    pub fn record_completed(&self) {
        Self::bump(&self.completed_requests);
    }

    pub fn record_failed(&self) {
        Self::bump(&self.failed_requests);
    }

    pub fn record_stale(&self) {
        Self::bump(&self.stale_finalizations);
    }

    pub fn record_store_error(&self) {
        Self::bump(&self.store_errors);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: load(&self.total_requests),
            missing_keys: load(&self.missing_keys),
            new_requests: load(&self.new_requests),
            bypassed_requests: load(&self.bypassed_requests),
            replayed_requests: load(&self.replayed_requests),
            in_progress_rejections: load(&self.in_progress_rejections),
            repeat_rejections: load(&self.repeat_rejections),
            completed_requests: load(&self.completed_requests),
            failed_requests: load(&self.failed_requests),
            stale_finalizations: load(&self.stale_finalizations),
            store_errors: load(&self.store_errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub missing_keys: u64,
    pub new_requests: u64,
    pub bypassed_requests: u64,
    pub replayed_requests: u64,
    pub in_progress_rejections: u64,
    pub repeat_rejections: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub stale_finalizations: u64,
    pub store_errors: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_requests(&self) -> u64 {
        self.replayed_requests + self.in_progress_rejections + self.repeat_rejections
    }

    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests() as f64 / self.total_requests as f64
        }
    }
}

/// What a duplicate gets once the original has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Replay the cached outcome verbatim.
    #[default]
    ReturnCached,
    /// Refuse the repeat outright.
    Reject,
}

/// Per-operation idempotency configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    /// Name of the guarded operation; keys are namespaced by it.
    pub scope: String,
    /// Pending-lease duration. Must exceed the operation's worst-case latency,
    /// otherwise a duplicate can reclaim the lease and run concurrently.
    pub timeout: Duration,
    /// Validity of a completed record.
    pub result_expire: Duration,
    pub repeat: RepeatPolicy,
}

impl IdempotencyPolicy {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            timeout: Duration::from_secs(60),
            result_expire: Duration::from_secs(3600),
            repeat: RepeatPolicy::ReturnCached,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_result_expire(mut self, result_expire: Duration) -> Self {
        self.result_expire = result_expire;
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatPolicy) -> Self {
        self.repeat = repeat;
        self
    }
}

/// Why a guarded call did not produce a fresh or replayed outcome.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    MissingKey(#[from] MissingKey),

    #[error("a request with idempotency key '{key}' is already in progress")]
    DuplicateInProgress { key: String },

    #[error("a request with idempotency key '{key}' was already processed")]
    AlreadyProcessed { key: String },

    /// The store could not guarantee an atomic claim; the operation was not run.
    #[error("record store unavailable: {0}")]
    Store(#[source] AppError),

    /// The guarded operation panicked or was aborted; its key was released.
    #[error("guarded operation aborted: {0}")]
    Aborted(String),

    /// The guarded operation's own error, unchanged.
    #[error("{0}")]
    Operation(E),
}

impl<E> ExecuteError<E> {
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            ExecuteError::DuplicateInProgress { .. } | ExecuteError::AlreadyProcessed { .. }
        )
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs guarded operations under the claim -> execute -> finalize protocol.
pub struct IdempotencyCoordinator {
    store: Arc<dyn RecordStore>,
    normalizer: KeyNormalizer,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, normalizer: KeyNormalizer) -> Self {
        Self {
            store,
            normalizer,
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn with_store(store: Arc<dyn RecordStore>) -> Self {
        Self::new(store, KeyNormalizer::default())
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Gets the metrics for this coordinator.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Canonical store key for a raw client key under `policy`.
    pub fn canonical_key(&self, policy: &IdempotencyPolicy, raw_key: &str) -> String {
        self.normalizer.normalize(&policy.scope, raw_key)
    }

    /// Extracts the request's key and runs `operation` at most once per key.
    pub async fn execute<F, Fut, E>(
        &self,
        policy: &IdempotencyPolicy,
        extractor: &dyn KeyExtractor,
        source: &KeySource<'_>,
        bypass: bool,
        operation: F,
    ) -> Result<Outcome, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
        E: Send + 'static,
    {
        self.metrics.record_request();

        let raw_key = match extractor.extract(source) {
            Ok(key) => key,
            Err(missing) => {
                self.metrics.record_missing_key();
                tracing::warn!(scope = %policy.scope, reason = %missing.0, "Rejecting request without idempotency key");
                return Err(ExecuteError::MissingKey(missing));
            }
        };

        self.run(policy, &raw_key, bypass, operation).await
    }

    /// Same as [`execute`](Self::execute) for a key already extracted.
    pub async fn execute_with_key<F, Fut, E>(
        &self,
        policy: &IdempotencyPolicy,
        raw_key: &str,
        bypass: bool,
        operation: F,
    ) -> Result<Outcome, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
        E: Send + 'static,
    {
        self.metrics.record_request();

        if raw_key.trim().is_empty() {
            self.metrics.record_missing_key();
            return Err(ExecuteError::MissingKey(MissingKey(
                "idempotency key is blank".to_string(),
            )));
        }

        self.run(policy, raw_key, bypass, operation).await
    }

    async fn run<F, Fut, E>(
        &self,
        policy: &IdempotencyPolicy,
        raw_key: &str,
        bypass: bool,
        operation: F,
    ) -> Result<Outcome, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
        E: Send + 'static,
    {
        let key = self.canonical_key(policy, raw_key);
        get_metrics().record_request(&policy.scope, bypass);

        let owner = if bypass {
            self.metrics.record_bypass();
            let owner = self
                .store
                .force_replace(&key, policy.timeout)
                .await
                .map_err(|e| self.store_failure(policy, e))?;
            tracing::info!(
                scope = %policy.scope,
                key = %mask_key(raw_key),
                "Bypass requested, forcing re-execution"
            );
            owner
        } else {
            match self
                .store
                .try_acquire(&key, policy.timeout)
                .await
                .map_err(|e| self.store_failure(policy, e))?
            {
                AcquireResult::Acquired(owner) => owner,
                AcquireResult::Conflict(existing) => {
                    return self.resolve_conflict(policy, raw_key, existing);
                }
            }
        };

        self.metrics.record_new();
        tracing::debug!(scope = %policy.scope, key = %mask_key(raw_key), owner = %owner, "Lease acquired");

        let lease = Lease {
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
            scope: policy.scope.clone(),
            key,
            owner,
        };
        lease.run(policy.result_expire, operation).await
    }

    fn resolve_conflict<E>(
        &self,
        policy: &IdempotencyPolicy,
        raw_key: &str,
        existing: IdempotencyRecord,
    ) -> Result<Outcome, ExecuteError<E>> {
        let masked = mask_key(raw_key);

        match (existing.state, policy.repeat) {
            (RecordState::Pending, _) => {
                self.metrics.record_in_progress();
                get_metrics().record_duplicate_in_progress(&policy.scope);
                tracing::warn!(scope = %policy.scope, key = %masked, "Duplicate request while original is in progress");
                Err(ExecuteError::DuplicateInProgress { key: masked })
            }
            (RecordState::Completed, RepeatPolicy::Reject) => {
                self.metrics.record_repeat_rejected();
                get_metrics().record_rejected_repeat(&policy.scope);
                tracing::warn!(scope = %policy.scope, key = %masked, "Repeated request rejected");
                Err(ExecuteError::AlreadyProcessed { key: masked })
            }
            (RecordState::Completed, RepeatPolicy::ReturnCached) => match existing.outcome() {
                Some(outcome) => {
                    self.metrics.record_replay();
                    get_metrics().record_replay(&policy.scope);
                    tracing::info!(
                        scope = %policy.scope,
                        key = %masked,
                        status = outcome.status_code,
                        "Replaying cached outcome"
                    );
                    Ok(outcome)
                }
                None => {
                    self.metrics.record_store_error();
                    Err(ExecuteError::Store(AppError::Internal(anyhow::anyhow!(
                        "Completed idempotency record has no cached outcome"
                    ))))
                }
            },
        }
    }

    fn store_failure<E>(&self, policy: &IdempotencyPolicy, error: AppError) -> ExecuteError<E> {
        self.metrics.record_store_error();
        tracing::error!(scope = %policy.scope, error = %error, "Record store unavailable, refusing to run guarded operation");
        ExecuteError::Store(error)
    }
}

/// A held lease: runs the operation and finalizes the record.
struct Lease {
    store: Arc<dyn RecordStore>,
    metrics: Arc<IdempotencyMetrics>,
    scope: String,
    key: String,
    owner: OwnerToken,
}

impl Lease {
    /// The operation and its finalization run on their own task so that
    /// dropping the caller's future leaves the record in a defined state.
    async fn run<F, Fut, E>(self, result_expire: Duration, operation: F) -> Result<Outcome, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
        E: Send + 'static,
    {
        let lease = Arc::new(self);
        let task_lease = Arc::clone(&lease);

        let handle = tokio::spawn(async move {
            let timer = LatencyTimer::new();
            let result = operation().await;
            get_metrics().record_execution(&task_lease.scope, result.is_ok(), timer.elapsed_ms());

            match &result {
                Ok(outcome) => task_lease.complete(outcome, result_expire).await,
                Err(_) => task_lease.release("operation failed").await,
            }
            result
        });

        match handle.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(ExecuteError::Operation(e)),
            Err(join_error) => {
                lease.release("operation aborted").await;
                Err(ExecuteError::Aborted(join_error.to_string()))
            }
        }
    }

    async fn complete(&self, outcome: &Outcome, result_expire: Duration) {
        match self
            .store
            .complete(&self.key, &self.owner, outcome, result_expire)
            .await
        {
            Ok(FinalizeResult::Applied) => {
                self.metrics.record_completed();
                tracing::debug!(scope = %self.scope, owner = %self.owner, status = outcome.status_code, "Cached outcome");
            }
            Ok(FinalizeResult::StaleOwner) => {
                // A newer attempt owns the key; its outcome is authoritative.
                self.metrics.record_stale();
                get_metrics().record_stale_finalization(&self.scope, "complete");
                tracing::warn!(scope = %self.scope, owner = %self.owner, "Lease lost before completion, outcome not cached");
            }
            Err(e) => {
                self.metrics.record_store_error();
                tracing::error!(scope = %self.scope, error = %e, "Failed to mark idempotency key as completed");
            }
        }
    }

    async fn release(&self, reason: &str) {
        self.metrics.record_failed();

        match self.store.release(&self.key, &self.owner).await {
            Ok(FinalizeResult::Applied) => {
                tracing::info!(scope = %self.scope, reason = reason, "Released idempotency key for retry");
            }
            Ok(FinalizeResult::StaleOwner) => {
                self.metrics.record_stale();
                get_metrics().record_stale_finalization(&self.scope, "release");
                tracing::warn!(scope = %self.scope, owner = %self.owner, reason = reason, "Lease lost before release");
            }
            Err(e) => {
                self.metrics.record_store_error();
                tracing::error!(scope = %self.scope, error = %e, "Failed to release idempotency key, it stays pending until its lease expires");
            }
        }
    }
}
