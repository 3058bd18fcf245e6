//! Side-effect seams the dispatcher drives but does not own: opening the
//! approval surface, and delivering a result back to a site tab. Neither
//! has a real implementation in this crate — the approval-surface UI and
//! the content-script bridge are external collaborators per `spec.md`
//! §1 — so each is a trait with a logging-only default and an in-memory
//! fake for tests, the same real/mock split `funding::chain_adapter`
//! uses for `ChainClient`/`MockBtcChain`.

use crate::envelope::BackgroundToSite;
use async_trait::async_trait;

#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// Request the approval surface to open (or come to front if already
    /// open). Returns `Err` if it could not be opened at all, in which
    /// case the dispatcher resolves the just-enqueued request with an
    /// "open manually" error per `spec.md` §4.B step 8.
    async fn open(&self) -> Result<(), OpenError>;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to open approval surface: {0}")]
pub struct OpenError(pub String);

#[async_trait]
pub trait TabChannel: Send + Sync {
    async fn send(&self, tab_id: u64, message: BackgroundToSite);
}

/// Default `ApprovalSurface`: logs the open request. There is no real
/// browser window to open from a bare Rust process.
pub struct LoggingApprovalSurface;

#[async_trait]
impl ApprovalSurface for LoggingApprovalSurface {
    async fn open(&self) -> Result<(), OpenError> {
        tracing::info!("approval surface open requested");
        Ok(())
    }
}

/// Default `TabChannel`: logs the delivered message instead of posting
/// into a real tab.
pub struct LoggingTabChannel;

#[async_trait]
impl TabChannel for LoggingTabChannel {
    async fn send(&self, tab_id: u64, message: BackgroundToSite) {
        tracing::info!(tab_id, ?message, "delivering result to tab");
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeApprovalSurface {
        pub should_fail: bool,
        pub open_count: Mutex<u32>,
    }

    #[async_trait]
    impl ApprovalSurface for FakeApprovalSurface {
        async fn open(&self) -> Result<(), OpenError> {
            *self.open_count.lock().unwrap() += 1;
            if self.should_fail {
                Err(OpenError("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    pub struct FakeTabChannel {
        pub delivered: Mutex<Vec<(u64, BackgroundToSite)>>,
    }

    #[async_trait]
    impl TabChannel for FakeTabChannel {
        async fn send(&self, tab_id: u64, message: BackgroundToSite) {
            self.delivered.lock().unwrap().push((tab_id, message));
        }
    }
}
