//! Data model for the pending-request store (`spec.md` §3, §4.A).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConnectRequest {
    pub request_id: String,
    pub tab_id: u64,
    pub origin: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignRequest {
    pub request_id: String,
    pub tab_id: u64,
    pub origin: Option<String>,
    pub created_at: u64,
    pub message: String,
}

/// The four session-storage keys `spec.md` §6.4 names, held together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PendingRequestState {
    pub active_connect: Option<PendingConnectRequest>,
    pub active_sign: Option<PendingSignRequest>,
    pub connect_queue: VecDeque<PendingConnectRequest>,
    pub sign_queue: VecDeque<PendingSignRequest>,
}

impl PendingRequestState {
    pub fn total_pending(&self) -> usize {
        self.connect_queue.len()
            + self.sign_queue.len()
            + self.active_connect.is_some() as usize
            + self.active_sign.is_some() as usize
    }

    pub fn is_idle(&self) -> bool {
        self.total_pending() == 0
    }

    /// Count of pending entries (active + queued, both kinds) whose
    /// origin matches `origin`, using the same "unknown" sentinel
    /// bucketing as `envelope::OriginKey`.
    pub fn count_for_origin(&self, origin: &str) -> usize {
        let matches = |o: &Option<String>| -> bool {
            let bucket = o.as_deref().unwrap_or(crate::envelope::OriginKey::UNKNOWN_BUCKET);
            bucket == origin
        };
        let mut n = 0;
        if let Some(r) = &self.active_connect {
            if matches(&r.origin) {
                n += 1;
            }
        }
        if let Some(r) = &self.active_sign {
            if matches(&r.origin) {
                n += 1;
            }
        }
        n += self.connect_queue.iter().filter(|r| matches(&r.origin)).count();
        n += self.sign_queue.iter().filter(|r| matches(&r.origin)).count();
        n
    }

    pub fn contains_request_id(&self, request_id: &str) -> bool {
        self.active_connect.as_ref().is_some_and(|r| r.request_id == request_id)
            || self.active_sign.as_ref().is_some_and(|r| r.request_id == request_id)
            || self.connect_queue.iter().any(|r| r.request_id == request_id)
            || self.sign_queue.iter().any(|r| r.request_id == request_id)
    }
}
