//! Data model for the callback consumer (`spec.md` §3, §4.F).

use serde::{Deserialize, Serialize};

/// A scheduler cycle event, ingested via `POST /v1/scheduler/cycle`.
/// Uniqueness is over `idempotency_key`; ordering per `agent_key` is by
/// `fence_token` (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleEvent {
    pub event_id: String,
    pub agent_key: String,
    pub idempotency_key: String,
    pub fence_token: u64,
    pub scheduler: serde_json::Value,
    pub agent: serde_json::Value,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
}

/// `{ txid: 64-hex, agentKey?, status, confirmations, feeSompi?,
/// broadcastTs?, confirmTs?, confirmTsSource?, updatedAt, ... }`
/// (`spec.md` §3). Identified by `txid` (lowercased); append-by-upsert,
/// most-recent-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_sompi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_ts_source: Option<ConfirmTsSource>,
    pub updated_at: i64,
}

impl ExecutionReceipt {
    /// `spec.md` §4.F "for each receipt counted as confirmed (`status ===
    /// confirmed` or `confirmations > 0`)".
    pub fn counts_as_confirmed(&self) -> bool {
        self.status == ReceiptStatus::Confirmed || self.confirmations > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmTsSource {
    Chain,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    Mismatch,
    Insufficient,
}

/// `POST /v1/receipt-consistency` body (`spec.md` §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    pub status: ConsistencyStatus,
    #[serde(default)]
    pub mismatches: Vec<String>,
    pub ts: i64,
}

/// Maximum distinct mismatch-kind strings kept on a single report;
/// `spec.md` §4.F "trims mismatch kinds to a bounded list".
pub const MAX_MISMATCH_KINDS: usize = 16;

/// A percentile pair, `spec.md` §3 `TelemetrySummary`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p95: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptsSummary {
    pub confirmation_latency_ms: Percentiles,
    pub receipt_lag_ms: Percentiles,
    pub confirm_ts_source_counts: ConfirmTsSourceCounts,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfirmTsSourceCounts {
    pub chain: u64,
    pub backend: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSummary {
    pub saturation_proxy_pct: f64,
    pub callbacks: CallbacksSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbacksSummary {
    pub latency_p95_bucket_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyCounters {
    pub consistent: u64,
    pub mismatch: u64,
    pub insufficient: u64,
}

/// `{ receipts: {...}, scheduler: {...} }` (`spec.md` §3), enriched with
/// consistency-check counters per §4.F "include consistency-check
/// counters from the report stream."
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub receipts: ReceiptsSummary,
    pub scheduler: SchedulerSummary,
    pub consistency: ConsistencyCounters,
}

/// An entry on the recent-events ring exposed by `GET /v1/events`
/// (`spec.md` §6.3). Consistency mismatches are always pushed here per
/// `spec.md` §4.F; cycle-event outcomes are recorded too so the ring
/// doubles as an audit trail of ingestion decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecentEvent {
    CycleAccepted { agent_key: String, fence_token: u64, ts: i64 },
    CycleDuplicate { agent_key: String, idempotency_key: String, ts: i64 },
    CycleStale { agent_key: String, fence_token: u64, current_fence: u64, ts: i64 },
    ConsistencyMismatch { txid: Option<String>, mismatches: Vec<String>, ts: i64 },
}
