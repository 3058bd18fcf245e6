//! Component F: the callback consumer & receipt fan-out service
//! (`spec.md` §4.F). Ingests scheduler cycle events behind an atomic
//! fence+idempotency decision, accepts execution receipts, fans them out
//! over SSE, and exposes a rolling telemetry summary consumed by the
//! transaction-builder's adaptive fee engine.

pub mod error;
pub mod fence;
pub mod idempotency;
pub mod model;
pub mod service;
pub mod sse;
pub mod store;
pub mod summary;

pub use error::ConsumerError;
pub use fence::{FenceDecision, FenceError, FenceStore, InMemoryFenceStore, RedisFenceStore, build_fence_store};
pub use idempotency::{
    IdempotencyGuard, InMemoryIdempotencyGuard, RedisIdempotencyGuard, build_idempotency_guard,
};
pub use model::{
    CallbacksSummary, ConfirmTsSource, ConfirmTsSourceCounts, ConsistencyCounters,
    ConsistencyReport, ConsistencyStatus, CycleEvent, ExecutionReceipt, Percentiles, RecentEvent,
    ReceiptStatus, ReceiptsSummary, SchedulerSummary, TelemetrySummary, MAX_MISMATCH_KINDS,
};
pub use service::{ConsumerState, router};
pub use sse::{ClientGuard, ReceiptBroadcast, ReceiptFilter, SseError};
pub use store::{EventStore, InMemoryReceiptRepo, PostgresReceiptRepo, ReceiptRepo, ReceiptRepoError, ReceiptStore, Ring};
pub use summary::{CycleIngestionSample, build_summary, consistency_counters, percentile, receipts_summary, scheduler_summary};
