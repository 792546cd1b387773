//! Redis-backed record store.
//!
//! Each record is a hash at `{prefix}:{key}` with a native `PEXPIRE`, so an
//! expired lease simply disappears. The four mutating operations are Lua
//! scripts and therefore run atomically on the server.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::idempotency::codec::ResultCodec;
use crate::idempotency::record::{chrono_duration, IdempotencyRecord, OwnerToken, Outcome};
use crate::idempotency::store::{AcquireResult, FinalizeResult, RecordStore};
use crate::observability::{get_metrics, LatencyTimer};

// KEYS[1] record; ARGV lease_ms, then field/value pairs of the new lease.
// Returns an empty list when acquired, otherwise the existing hash.
const ACQUIRE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HGETALL', KEYS[1])
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return {}
"#;

// KEYS[1] record; ARGV owner, status, payload, expires_at, ttl_ms.
const COMPLETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'owner') ~= ARGV[1] then
  return 0
end
if redis.call('HGET', KEYS[1], 'state') ~= 'PENDING' then
  return 0
end
redis.call('HSET', KEYS[1], 'state', 'COMPLETED', 'status', ARGV[2], 'payload', ARGV[3], 'expires_at', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return 1
"#;

// KEYS[1] record; ARGV owner.
const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'owner') == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
"#;

// KEYS[1] record; ARGV as for acquire.
const REPLACE_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
"#;

/// Record store on a Redis server.
pub struct RedisRecordStore {
    client: redis::Client,
    key_prefix: String,
    codec: ResultCodec,
    acquire: Script,
    complete: Script,
    release: Script,
    replace: Script,
}

impl RedisRecordStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            codec: ResultCodec::new(),
            acquire: Script::new(ACQUIRE_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            replace: Script::new(REPLACE_SCRIPT),
        }
    }

    pub fn open(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(AppError::Redis)?;
        Ok(Self::new(client, key_prefix))
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("Redis connection failed: {}", e)))
    }

    fn observe<T>(&self, operation: &str, timer: LatencyTimer, result: &Result<T>) {
        get_metrics().record_store_operation(
            self.backend_name(),
            operation,
            timer.elapsed_ms(),
            result.is_ok(),
        );
        if let Err(e) = result {
            tracing::warn!(operation = operation, error = %e, "Redis record store operation failed");
        }
    }

    /// Writes a fresh pending lease with `script`; shared by acquire and
    /// force-replace, which take identical arguments.
    async fn write_lease<T: redis::FromRedisValue>(
        &self,
        script: &Script,
        key: &str,
        lease: Duration,
    ) -> Result<(OwnerToken, T)> {
        let record = IdempotencyRecord::pending(key, lease);
        let fields = self.codec.record_to_fields(&record)?;
        let mut conn = self.connection().await?;

        let mut invocation = script.prepare_invoke();
        invocation.key(self.make_key(key)).arg(lease_millis(lease));
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }

        let value: T = invocation.invoke_async(&mut conn).await?;
        Ok((record.owner_token, value))
    }
}

fn lease_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn into_pairs(flat: Vec<String>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((field, value));
    }
    pairs
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<AcquireResult> {
        let timer = LatencyTimer::new();

        let result: Result<AcquireResult> = async {
            let (owner, existing): (OwnerToken, Vec<String>) =
                self.write_lease(&self.acquire, key, lease).await?;
            if existing.is_empty() {
                return Ok(AcquireResult::Acquired(owner));
            }

            match self.codec.record_from_fields(key, into_pairs(existing))? {
                Some(record) => Ok(AcquireResult::Conflict(record)),
                None => Err(AppError::Internal(anyhow!(
                    "Acquire script returned an empty conflict record"
                ))),
            }
        }
        .await;

        self.observe("try_acquire", timer, &result);
        result
    }

    async fn complete(
        &self,
        key: &str,
        owner: &OwnerToken,
        outcome: &Outcome,
        result_ttl: Duration,
    ) -> Result<FinalizeResult> {
        let timer = LatencyTimer::new();

        let result: Result<FinalizeResult> = async {
            let payload = self.codec.encode_payload(&outcome.payload)?;
            let expires_at = Utc::now() + chrono_duration(result_ttl);
            let mut conn = self.connection().await?;

            let applied: i64 = self
                .complete
                .key(self.make_key(key))
                .arg(owner.to_string())
                .arg(outcome.status_code)
                .arg(payload)
                .arg(expires_at.timestamp_millis())
                .arg(lease_millis(result_ttl))
                .invoke_async(&mut conn)
                .await?;

            Ok(if applied == 1 {
                FinalizeResult::Applied
            } else {
                FinalizeResult::StaleOwner
            })
        }
        .await;

        self.observe("complete", timer, &result);
        result
    }

    async fn release(&self, key: &str, owner: &OwnerToken) -> Result<FinalizeResult> {
        let timer = LatencyTimer::new();

        let result: Result<FinalizeResult> = async {
            let mut conn = self.connection().await?;
            let released: i64 = self
                .release
                .key(self.make_key(key))
                .arg(owner.to_string())
                .invoke_async(&mut conn)
                .await?;

            Ok(if released == 1 {
                FinalizeResult::Applied
            } else {
                FinalizeResult::StaleOwner
            })
        }
        .await;

        self.observe("release", timer, &result);
        result
    }

    async fn force_replace(&self, key: &str, lease: Duration) -> Result<OwnerToken> {
        let timer = LatencyTimer::new();

        let result = self
            .write_lease::<i64>(&self.replace, key, lease)
            .await
            .map(|(owner, _)| owner);

        self.observe("force_replace", timer, &result);
        result
    }

    async fn read(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let timer = LatencyTimer::new();

        let result: Result<Option<IdempotencyRecord>> = async {
            let mut conn = self.connection().await?;
            let fields: Vec<(String, String)> = conn.hgetall(self.make_key(key)).await?;
            self.codec.record_from_fields(key, fields)
        }
        .await;

        self.observe("read", timer, &result);
        result
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
