//! SSE fan-out of newly-accepted receipts (`spec.md` §4.F, §6.3).
//!
//! A `tokio::sync::broadcast` channel carries every accepted receipt to
//! all live subscribers; each client additionally gets a bounded replay
//! of `recentReceipts` on connect when `replay=1`. The max-client cap is
//! a plain `AtomicUsize`, released by `ClientGuard::drop` so a
//! disconnecting client always frees its slot even on an abrupt stream
//! end (`spec.md` §5: "SSE clients can disconnect at any time; the
//! service cleans up without blocking").

use super::model::ExecutionReceipt;
use std::sync::atomic::{AtomicUsize, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct ReceiptBroadcast {
    sender: broadcast::Sender<ExecutionReceipt>,
    client_count: AtomicUsize,
    max_clients: usize,
    next_client_id: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("max SSE clients ({0}) reached")]
    CapacityExceeded(usize),
}

impl ReceiptBroadcast {
    pub fn new(max_clients: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(16));
        Self {
            sender,
            client_count: AtomicUsize::new(0),
            max_clients,
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn publish(&self, receipt: ExecutionReceipt) {
        // No live subscribers is not an error; the broadcast is best-effort.
        let _ = self.sender.send(receipt);
    }

    /// Reserves a client slot, returning a receiver plus a guard that
    /// releases the slot on drop, or an error past `max_clients`
    /// (`spec.md` §4.F "enforces a max-client cap (503 past the cap)").
    pub fn subscribe(self: &Arc<Self>) -> Result<(ClientGuard, broadcast::Receiver<ExecutionReceipt>), SseError> {
        let current = self.client_count.fetch_add(1, Ordering::SeqCst);
        if current >= self.max_clients {
            self.client_count.fetch_sub(1, Ordering::SeqCst);
            return Err(SseError::CapacityExceeded(self.max_clients));
        }
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.sender.subscribe();
        Ok((
            ClientGuard {
                broadcast: self.clone(),
                id,
            },
            receiver,
        ))
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

pub struct ClientGuard {
    broadcast: Arc<ReceiptBroadcast>,
    pub id: u64,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.broadcast.client_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Filter used by every SSE stream: an unset field always matches;
/// a set field must equal the receipt's corresponding value.
#[derive(Debug, Clone, Default)]
pub struct ReceiptFilter {
    pub txid: Option<String>,
    pub agent_key: Option<String>,
}

impl ReceiptFilter {
    pub fn matches(&self, receipt: &ExecutionReceipt) -> bool {
        if let Some(txid) = &self.txid {
            if &receipt.txid != txid {
                return false;
            }
        }
        if let Some(agent_key) = &self.agent_key {
            if receipt.agent_key.as_deref() != Some(agent_key.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::model::ReceiptStatus;

    fn receipt(txid: &str, agent_key: Option<&str>) -> ExecutionReceipt {
        ExecutionReceipt {
            txid: txid.to_string(),
            agent_key: agent_key.map(str::to_string),
            status: ReceiptStatus::Confirmed,
            confirmations: 1,
            fee_sompi: None,
            broadcast_ts: None,
            confirm_ts: None,
            confirm_ts_source: None,
            updated_at: 0,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ReceiptFilter::default();
        assert!(filter.matches(&receipt("a".repeat(64).as_str(), None)));
    }

    #[test]
    fn txid_filter_rejects_mismatch() {
        let filter = ReceiptFilter {
            txid: Some("b".repeat(64)),
            agent_key: None,
        };
        assert!(!filter.matches(&receipt(&"a".repeat(64), None)));
        assert!(filter.matches(&receipt(&"b".repeat(64), None)));
    }

    #[tokio::test]
    async fn subscribe_past_cap_is_rejected() {
        let broadcast = Arc::new(ReceiptBroadcast::new(1, 16));
        let (_guard1, _rx1) = broadcast.subscribe().unwrap();
        assert!(broadcast.subscribe().is_err());
    }

    #[tokio::test]
    async fn dropping_guard_frees_the_slot() {
        let broadcast = Arc::new(ReceiptBroadcast::new(1, 16));
        {
            let (_guard, _rx) = broadcast.subscribe().unwrap();
            assert_eq!(broadcast.client_count(), 1);
        }
        assert_eq!(broadcast.client_count(), 0);
        assert!(broadcast.subscribe().is_ok());
    }

    #[tokio::test]
    async fn published_receipt_is_received_by_subscriber() {
        let broadcast = Arc::new(ReceiptBroadcast::new(4, 16));
        let (_guard, mut rx) = broadcast.subscribe().unwrap();
        broadcast.publish(receipt(&"a".repeat(64), Some("u1:a1")));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.txid, "a".repeat(64));
    }
}
