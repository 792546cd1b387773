pub mod cleanup;
pub mod codec;
pub mod coordinator;
pub mod key_extractor;
pub mod memory;
pub mod record;
pub mod redis_store;
pub mod store;

pub use cleanup::IdempotencyCleanupJob;
pub use codec::ResultCodec;
pub use coordinator::{
    ExecuteError, IdempotencyCoordinator, IdempotencyMetrics, IdempotencyPolicy, MetricsSnapshot,
    RepeatPolicy,
};
pub use key_extractor::{
    BodyFieldsKeyExtractor, FirstOfKeyExtractor, HeaderKeyExtractor, KeyExtractor, KeyNormalizer,
    KeySource, MissingKey,
};
pub use memory::InMemoryRecordStore;
pub use record::{IdempotencyRecord, OwnerToken, Outcome, RecordState};
pub use redis_store::RedisRecordStore;
pub use store::{AcquireResult, FinalizeResult, RecordStore};
