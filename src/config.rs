use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::idempotency::{IdempotencyPolicy, RepeatPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub redis: RedisSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    /// Artificial latency of the slow demo payment.
    pub slow_operation_ms: u64,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            slow_operation_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "guard".to_string(),
        }
    }
}

/// Which record store backs the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub store: StoreBackend,
    pub key_header: String,
    pub replay_header: String,
    pub key_prefix: String,
    /// Pending-lease duration.
    pub timeout_secs: u64,
    /// Completed-record TTL.
    pub result_expire_secs: u64,
    pub cleanup_interval_secs: u64,
    pub operations: HashMap<String, OperationSettings>,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            key_header: "Idempotent-Key".to_string(),
            replay_header: "Idempotent-Replay".to_string(),
            key_prefix: "idem".to_string(),
            timeout_secs: 60,
            result_expire_secs: 3600,
            cleanup_interval_secs: 60,
            operations: HashMap::new(),
        }
    }
}

/// Per-operation overrides; unset fields fall back to the global values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperationSettings {
    pub timeout_secs: Option<u64>,
    pub result_expire_secs: Option<u64>,
}

impl IdempotencySettings {
    /// Builds the policy for a guarded operation, applying any override.
    pub fn policy_for(&self, scope: &str, repeat: RepeatPolicy) -> IdempotencyPolicy {
        let overrides = self.operations.get(scope);
        let timeout = overrides
            .and_then(|o| o.timeout_secs)
            .unwrap_or(self.timeout_secs);
        let result_expire = overrides
            .and_then(|o| o.result_expire_secs)
            .unwrap_or(self.result_expire_secs);

        IdempotencyPolicy::new(scope)
            .with_timeout(Duration::from_secs(timeout))
            .with_result_expire(Duration::from_secs(result_expire))
            .with_repeat(repeat)
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
