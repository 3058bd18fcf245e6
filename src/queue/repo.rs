//! Persistence for [`PendingRequestState`].
//!
//! `spec.md` §4.A: "Persistence errors are reported to the dispatcher;
//! the in-memory view remains authoritative until the next successful
//! write." [`PendingRequestRepo::write`] therefore returns a `Result`
//! whose `Err` carries no recovery action beyond logging — the caller
//! keeps using its already-updated in-memory copy regardless.

use super::model::PendingRequestState;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("io error persisting pending-request state: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error persisting pending-request state: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait PendingRequestRepo: Send + Sync {
    async fn read(&self) -> PendingRequestState;
    async fn write(&self, state: &PendingRequestState) -> Result<(), RepoError>;
}

/// Default repo: state lives only in process memory, matching the
/// worst case of the browser-extension session storage being
/// unavailable in a local dev harness.
#[derive(Default)]
pub struct InMemoryPendingRequestRepo {
    state: Mutex<PendingRequestState>,
}

impl InMemoryPendingRequestRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingRequestRepo for InMemoryPendingRequestRepo {
    async fn read(&self) -> PendingRequestState {
        self.state.lock().expect("pending-request mutex poisoned").clone()
    }

    async fn write(&self, state: &PendingRequestState) -> Result<(), RepoError> {
        *self.state.lock().expect("pending-request mutex poisoned") = state.clone();
        Ok(())
    }
}

/// Durable repo backed by a single JSON file, standing in for the
/// browser extension's `chrome.storage.session` under the four keys
/// `spec.md` §6.4 names (`activeConnect`, `activeSign`, `connectQueue`,
/// `signQueue`) — serialized here as one JSON document rather than four
/// separate keys, since a local file has no per-key API.
pub struct JsonFilePendingRequestRepo {
    path: PathBuf,
}

impl JsonFilePendingRequestRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PendingRequestRepo for JsonFilePendingRequestRepo {
    async fn read(&self) -> PendingRequestState {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => PendingRequestState::default(),
        }
    }

    async fn write(&self, state: &PendingRequestState) -> Result<(), RepoError> {
        let bytes = serde_json::to_vec(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::model::PendingConnectRequest;

    #[tokio::test]
    async fn in_memory_repo_round_trips() {
        let repo = InMemoryPendingRequestRepo::new();
        let mut state = PendingRequestState::default();
        state.connect_queue.push_back(PendingConnectRequest {
            request_id: "r1".to_string(),
            tab_id: 1,
            origin: Some("https://a.test".to_string()),
            created_at: 0,
        });
        repo.write(&state).await.unwrap();
        let read_back = repo.read().await;
        assert_eq!(read_back.connect_queue.len(), 1);
    }

    #[tokio::test]
    async fn json_file_repo_round_trips() {
        let dir = std::env::temp_dir().join(format!("forgeos-test-{}", uuid::Uuid::new_v4()));
        let repo = JsonFilePendingRequestRepo::new(dir.join("state.json"));
        let mut state = PendingRequestState::default();
        state.connect_queue.push_back(PendingConnectRequest {
            request_id: "r1".to_string(),
            tab_id: 1,
            origin: None,
            created_at: 0,
        });
        repo.write(&state).await.unwrap();
        let read_back = repo.read().await;
        assert_eq!(read_back.connect_queue.len(), 1);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn json_file_repo_missing_file_reads_default() {
        let repo = JsonFilePendingRequestRepo::new("/nonexistent/forgeos/state.json");
        let state = repo.read().await;
        assert!(state.is_idle());
    }
}
