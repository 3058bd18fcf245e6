//! In-process receipt and event storage for the callback consumer
//! (`spec.md` §4.F, §5 "ring buffers for recent events and receipts are
//! bounded; eviction is FIFO").
//!
//! [`ReceiptStore`] is the structure every handler queries directly: a
//! [`dashmap::DashMap`] keyed by `txid` for O(1) concurrent point lookups
//! plus a bounded insertion-order ring so `recent()` and the telemetry
//! summary see a stable, capped working set. [`ReceiptRepo`] is the
//! durability layer behind it, following the same split the queue store
//! uses between in-memory state and a pluggable persistence backend.

use super::model::{ExecutionReceipt, RecentEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Bounded FIFO ring, shared by the recent-events and recent-receipts
/// order tracking. Eviction is strictly oldest-first.
pub struct Ring<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Pushes `item`, evicting the oldest entry if at capacity. Returns
    /// the evicted item, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.items.lock().expect("ring mutex poisoned");
        let evicted = if items.len() >= self.capacity { items.pop_front() } else { None };
        items.push_back(item);
        evicted
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().expect("ring mutex poisoned").iter().cloned().collect()
    }

    pub fn tail(&self, n: usize) -> Vec<T> {
        let items = self.items.lock().expect("ring mutex poisoned");
        let len = items.len();
        let start = len.saturating_sub(n);
        items.iter().skip(start).cloned().collect()
    }
}

/// Durable receipt persistence behind [`ReceiptStore`]. `spec.md` does
/// not require durability across restarts, but the ambient stack
/// carries it the way the dispatcher's queue store does (in-memory by
/// default, durable backend pluggable).
#[derive(Debug, Error)]
pub enum ReceiptRepoError {
    #[error("database error: {0}")]
    Database(String),
}

#[async_trait]
pub trait ReceiptRepo: Send + Sync {
    async fn upsert(&self, receipt: &ExecutionReceipt) -> Result<(), ReceiptRepoError>;
    async fn load_all(&self) -> Result<Vec<ExecutionReceipt>, ReceiptRepoError>;
}

#[derive(Default)]
pub struct InMemoryReceiptRepo;

#[async_trait]
impl ReceiptRepo for InMemoryReceiptRepo {
    async fn upsert(&self, _receipt: &ExecutionReceipt) -> Result<(), ReceiptRepoError> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ExecutionReceipt>, ReceiptRepoError> {
        Ok(Vec::new())
    }
}

pub struct PostgresReceiptRepo {
    pool: sqlx::PgPool,
}

impl PostgresReceiptRepo {
    pub async fn connect(database_url: &str) -> Result<Self, ReceiptRepoError> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .map_err(|e| ReceiptRepoError::Database(e.to_string()))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_receipts (
                txid TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| ReceiptRepoError::Database(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ReceiptRepo for PostgresReceiptRepo {
    async fn upsert(&self, receipt: &ExecutionReceipt) -> Result<(), ReceiptRepoError> {
        let payload = serde_json::to_value(receipt).map_err(|e| ReceiptRepoError::Database(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO execution_receipts (txid, payload, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (txid) DO UPDATE SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&receipt.txid)
        .bind(payload)
        .bind(receipt.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ReceiptRepoError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ExecutionReceipt>, ReceiptRepoError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as("SELECT payload FROM execution_receipts ORDER BY updated_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReceiptRepoError::Database(e.to_string()))?;
        rows.into_iter()
            .map(|(payload,)| serde_json::from_value(payload).map_err(|e| ReceiptRepoError::Database(e.to_string())))
            .collect()
    }
}

/// Live query surface every handler reads from directly. `spec.md` §4.F:
/// "on accept, upsert by `txid`... fan out"; §8: "two posts with the
/// same explicit `idempotencyKey` result in one stored receipt."
pub struct ReceiptStore {
    by_txid: DashMap<String, ExecutionReceipt>,
    order: Ring<String>,
}

impl ReceiptStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_txid: DashMap::new(),
            order: Ring::new(capacity),
        }
    }

    /// Upserts by `txid`, most-recent-wins. Returns `true` if this
    /// `txid` was not previously known (used to decide whether to push
    /// into the insertion-order ring).
    pub fn upsert(&self, receipt: ExecutionReceipt) -> bool {
        let is_new = !self.by_txid.contains_key(&receipt.txid);
        if is_new {
            if let Some(evicted) = self.order.push(receipt.txid.clone()) {
                self.by_txid.remove(&evicted);
            }
        }
        self.by_txid.insert(receipt.txid.clone(), receipt);
        is_new
    }

    pub fn get(&self, txid: &str) -> Option<ExecutionReceipt> {
        self.by_txid.get(txid).map(|r| r.value().clone())
    }

    pub fn recent(&self) -> Vec<ExecutionReceipt> {
        self.order.snapshot().into_iter().filter_map(|txid| self.get(&txid)).collect()
    }

    /// Last `n` receipts in arrival order, for SSE replay (`spec.md`
    /// §4.F "emits the last `limit` matching receipts").
    pub fn tail(&self, n: usize) -> Vec<ExecutionReceipt> {
        self.order.tail(n).into_iter().filter_map(|txid| self.get(&txid)).collect()
    }

    pub fn hydrate(&self, receipts: Vec<ExecutionReceipt>) {
        for receipt in receipts {
            self.upsert(receipt);
        }
    }
}

/// Recent-events ring backing `GET /v1/events`.
pub struct EventStore {
    ring: Ring<RecentEvent>,
}

impl EventStore {
    pub fn new(capacity: usize) -> Self {
        Self { ring: Ring::new(capacity) }
    }

    pub fn push(&self, event: RecentEvent) {
        self.ring.push(event);
    }

    pub fn recent(&self) -> Vec<RecentEvent> {
        self.ring.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::model::ReceiptStatus;

    fn receipt(txid: &str, updated_at: i64) -> ExecutionReceipt {
        ExecutionReceipt {
            txid: txid.to_string(),
            agent_key: None,
            status: ReceiptStatus::Pending,
            confirmations: 0,
            fee_sompi: None,
            broadcast_ts: None,
            confirm_ts: None,
            confirm_ts_source: None,
            updated_at,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = ReceiptStore::new(10);
        assert!(store.upsert(receipt("a".repeat(64).as_str(), 1)));
        let got = store.get(&"a".repeat(64)).unwrap();
        assert_eq!(got.updated_at, 1);
    }

    #[test]
    fn second_upsert_of_same_txid_is_not_new_and_overwrites() {
        let store = ReceiptStore::new(10);
        assert!(store.upsert(receipt(&"a".repeat(64), 1)));
        assert!(!store.upsert(receipt(&"a".repeat(64), 2)));
        assert_eq!(store.get(&"a".repeat(64)).unwrap().updated_at, 2);
        assert_eq!(store.recent().len(), 1);
    }

    #[test]
    fn ring_evicts_oldest_first_past_capacity() {
        let store = ReceiptStore::new(2);
        store.upsert(receipt(&"1".repeat(64), 1));
        store.upsert(receipt(&"2".repeat(64), 2));
        store.upsert(receipt(&"3".repeat(64), 3));
        let recent = store.recent();
        assert_eq!(recent.len(), 2);
        assert!(store.get(&"1".repeat(64)).is_none());
        assert!(store.get(&"3".repeat(64)).is_some());
    }

    #[test]
    fn tail_returns_last_n_in_arrival_order() {
        let store = ReceiptStore::new(10);
        for i in 1..=5 {
            store.upsert(receipt(&i.to_string().repeat(64), i));
        }
        let tail = store.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].updated_at, 5);
    }
}
