//! Component B: the popup dispatcher (`spec.md` §4.B).
//!
//! "All writes pass through a single promise chain so that no two
//! admissions/resolutions interleave." In this crate that promise chain
//! is a single-consumer `tokio::mpsc` channel feeding one task, the same
//! single-threaded-actor shape `ubscore.rs`'s `UBSCore` uses: "Natural
//! atomicity (no locks needed), no double-spend risk, predictable
//! latency" is exactly the guarantee the dispatcher needs for "no two
//! admissions/resolutions interleave". Read-only snapshots are served
//! from a `tokio::sync::watch` so they "may run concurrently" without
//! touching the mutation channel.

use crate::config::DispatcherConfig;
use crate::envelope::{BackgroundToSite, ConnectResult, OriginKey};
use crate::metrics::DispatcherMetrics;
use crate::queue::model::{PendingConnectRequest, PendingRequestState, PendingSignRequest};
use crate::queue::repo::PendingRequestRepo;
use crate::queue::store;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use super::allowlist::AllowList;
use super::surface::{ApprovalSurface, TabChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAdmission {
    /// Fast path: origin was already on the allow-list.
    FastPathApproved,
    Admitted,
    RejectedCapacity,
    RejectedPerOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAdmission {
    Admitted,
    RejectedCapacity,
    RejectedPerOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    Stale,
}

enum Command {
    SiteConnect {
        request_id: String,
        tab_id: u64,
        origin: Option<String>,
        now: u64,
        reply: oneshot::Sender<ConnectAdmission>,
    },
    SiteSign {
        request_id: String,
        tab_id: u64,
        origin: Option<String>,
        message: String,
        now: u64,
        reply: oneshot::Sender<SignAdmission>,
    },
    ApprovalConnectApprove {
        request_id: String,
        address: String,
        network: String,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    ApprovalConnectReject {
        request_id: String,
        error: Option<String>,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    ApprovalSignApprove {
        request_id: String,
        signature: String,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    ApprovalSignReject {
        request_id: String,
        error: Option<String>,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    TabClosed {
        tab_id: u64,
        reply: oneshot::Sender<()>,
    },
    TickExpiry {
        now: u64,
        reply: oneshot::Sender<()>,
    },
}

/// Handle held by callers (the site bridge, the approval surface, the
/// expiry timer). Cloning a handle is cheap; every clone feeds the same
/// single-consumer channel.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PendingRequestState>,
    pub allow_list: Arc<AllowList>,
}

impl DispatcherHandle {
    pub fn snapshot(&self) -> PendingRequestState {
        self.snapshot.borrow().clone()
    }

    pub async fn site_connect(
        &self,
        request_id: String,
        tab_id: u64,
        origin: Option<String>,
        now: u64,
    ) -> ConnectAdmission {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::SiteConnect {
                request_id,
                tab_id,
                origin,
                now,
                reply,
            })
            .await;
        rx.await.unwrap_or(ConnectAdmission::RejectedCapacity)
    }

    pub async fn site_sign(
        &self,
        request_id: String,
        tab_id: u64,
        origin: Option<String>,
        message: String,
        now: u64,
    ) -> SignAdmission {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::SiteSign {
                request_id,
                tab_id,
                origin,
                message,
                now,
                reply,
            })
            .await;
        rx.await.unwrap_or(SignAdmission::RejectedCapacity)
    }

    pub async fn approve_connect(
        &self,
        request_id: String,
        address: String,
        network: String,
    ) -> ResolveOutcome {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ApprovalConnectApprove {
                request_id,
                address,
                network,
                reply,
            })
            .await;
        rx.await.unwrap_or(ResolveOutcome::Stale)
    }

    pub async fn reject_connect(&self, request_id: String, error: Option<String>) -> ResolveOutcome {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ApprovalConnectReject {
                request_id,
                error,
                reply,
            })
            .await;
        rx.await.unwrap_or(ResolveOutcome::Stale)
    }

    pub async fn approve_sign(&self, request_id: String, signature: String) -> ResolveOutcome {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ApprovalSignApprove {
                request_id,
                signature,
                reply,
            })
            .await;
        rx.await.unwrap_or(ResolveOutcome::Stale)
    }

    pub async fn reject_sign(&self, request_id: String, error: Option<String>) -> ResolveOutcome {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ApprovalSignReject {
                request_id,
                error,
                reply,
            })
            .await;
        rx.await.unwrap_or(ResolveOutcome::Stale)
    }

    pub async fn tab_closed(&self, tab_id: u64) {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::TabClosed { tab_id, reply }).await;
        let _ = rx.await;
    }

    pub async fn tick_expiry(&self, now: u64) {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::TickExpiry { now, reply }).await;
        let _ = rx.await;
    }
}

struct Inner {
    repo: Arc<dyn PendingRequestRepo>,
    config: DispatcherConfig,
    allow_list: Arc<AllowList>,
    approval_surface: Arc<dyn ApprovalSurface>,
    tab_channel: Arc<dyn TabChannel>,
    metrics: Arc<DispatcherMetrics>,
}

/// Spawn the dispatcher actor task and return a handle to it.
pub fn spawn(
    initial_state: PendingRequestState,
    repo: Arc<dyn PendingRequestRepo>,
    config: DispatcherConfig,
    allow_list: Arc<AllowList>,
    approval_surface: Arc<dyn ApprovalSurface>,
    tab_channel: Arc<dyn TabChannel>,
    metrics: Arc<DispatcherMetrics>,
) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(initial_state.clone());
    let inner = Inner {
        repo,
        config,
        allow_list: allow_list.clone(),
        approval_surface,
        tab_channel,
        metrics,
    };
    tokio::spawn(run(inner, initial_state, rx, snapshot_tx));
    DispatcherHandle {
        tx,
        snapshot: snapshot_rx,
        allow_list,
    }
}

async fn run(
    inner: Inner,
    mut state: PendingRequestState,
    mut rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<PendingRequestState>,
) {
    while let Some(cmd) = rx.recv().await {
        state = handle_command(&inner, state, cmd).await;
        let _ = snapshot_tx.send(state.clone());
    }
}

async fn persist(inner: &Inner, state: &PendingRequestState) {
    if let Err(e) = inner.repo.write(state).await {
        tracing::error!(error = %e, "failed to persist pending-request state");
    }
}

async fn handle_command(
    inner: &Inner,
    state: PendingRequestState,
    cmd: Command,
) -> PendingRequestState {
    match cmd {
        Command::SiteConnect {
            request_id,
            tab_id,
            origin,
            now,
            reply,
        } => {
            let origin_key = OriginKey::parse(origin.as_deref());
            if let Some(result) = inner.allow_list.lookup(&origin_key) {
                inner
                    .tab_channel
                    .send(
                        tab_id,
                        BackgroundToSite::ConnectResult {
                            request_id,
                            result: Some(result),
                            error: None,
                        },
                    )
                    .await;
                let _ = reply.send(ConnectAdmission::FastPathApproved);
                return state;
            }

            let (mut state, outcome) = admit_connect(inner, state, &origin_key, now);
            match outcome {
                ConnectAdmission::Admitted => {
                    let was_idle_before_enqueue = state.total_pending() == 0;
                    let req = PendingConnectRequest {
                        request_id: request_id.clone(),
                        tab_id,
                        origin: origin.clone(),
                        created_at: now,
                    };
                    state = store::enqueue_connect(state, req, inner.config.strict_global_order);
                    persist(inner, &state).await;
                    inner.metrics.admitted_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if was_idle_before_enqueue {
                        if let Err(e) = inner.approval_surface.open().await {
                            tracing::warn!(error = %e, "failed to open approval surface");
                            let (next_state, removed) =
                                store::remove_connect_by_id(state, &request_id);
                            state = next_state;
                            if removed.is_some() {
                                inner
                                    .tab_channel
                                    .send(
                                        tab_id,
                                        BackgroundToSite::ConnectResult {
                                            request_id,
                                            result: None,
                                            error: Some("open manually".to_string()),
                                        },
                                    )
                                    .await;
                            }
                            persist(inner, &state).await;
                        }
                    }
                }
                ConnectAdmission::RejectedCapacity => {
                    inner.metrics.rejected_capacity_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inner
                        .tab_channel
                        .send(
                            tab_id,
                            BackgroundToSite::ConnectResult {
                                request_id,
                                result: None,
                                error: Some("too many pending requests".to_string()),
                            },
                        )
                        .await;
                }
                ConnectAdmission::RejectedPerOrigin => {
                    inner.metrics.rejected_per_origin_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inner
                        .tab_channel
                        .send(
                            tab_id,
                            BackgroundToSite::ConnectResult {
                                request_id,
                                result: None,
                                error: Some("too many from this site".to_string()),
                            },
                        )
                        .await;
                }
                ConnectAdmission::FastPathApproved => unreachable!(),
            }
            let _ = reply.send(outcome);
            state
        }

        Command::SiteSign {
            request_id,
            tab_id,
            origin,
            message,
            now,
            reply,
        } => {
            let origin_key = OriginKey::parse(origin.as_deref());
            let (mut state, outcome) = admit_sign(inner, state, &origin_key, now);
            match outcome {
                SignAdmission::Admitted => {
                    let was_idle_before_enqueue = state.total_pending() == 0;
                    let req = PendingSignRequest {
                        request_id: request_id.clone(),
                        tab_id,
                        origin: origin.clone(),
                        created_at: now,
                        message,
                    };
                    state = store::enqueue_sign(state, req, inner.config.strict_global_order);
                    persist(inner, &state).await;
                    inner.metrics.admitted_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if was_idle_before_enqueue {
                        if let Err(e) = inner.approval_surface.open().await {
                            tracing::warn!(error = %e, "failed to open approval surface");
                            let (next_state, removed) = store::remove_sign_by_id(state, &request_id);
                            state = next_state;
                            if removed.is_some() {
                                inner
                                    .tab_channel
                                    .send(
                                        tab_id,
                                        BackgroundToSite::SignResult {
                                            request_id,
                                            result: None,
                                            error: Some("open manually".to_string()),
                                        },
                                    )
                                    .await;
                            }
                            persist(inner, &state).await;
                        }
                    }
                }
                SignAdmission::RejectedCapacity => {
                    inner.metrics.rejected_capacity_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inner
                        .tab_channel
                        .send(
                            tab_id,
                            BackgroundToSite::SignResult {
                                request_id,
                                result: None,
                                error: Some("too many pending requests".to_string()),
                            },
                        )
                        .await;
                }
                SignAdmission::RejectedPerOrigin => {
                    inner.metrics.rejected_per_origin_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inner
                        .tab_channel
                        .send(
                            tab_id,
                            BackgroundToSite::SignResult {
                                request_id,
                                result: None,
                                error: Some("too many from this site".to_string()),
                            },
                        )
                        .await;
                }
            }
            let _ = reply.send(outcome);
            state
        }

        Command::ApprovalConnectApprove {
            request_id,
            address,
            network,
            reply,
        } => {
            let result = store::resolve_active_connect(state, Some(&request_id));
            let outcome = finish_resolution(
                inner,
                result.stale,
                result.resolved.map(|r| {
                    (
                        r.tab_id,
                        BackgroundToSite::ConnectResult {
                            request_id: r.request_id,
                            result: Some(ConnectResult { address, network }),
                            error: None,
                        },
                    )
                }),
            )
            .await;
            persist(inner, &result.state).await;
            reopen_if_pending(inner, &result.state).await;
            let _ = reply.send(outcome);
            result.state
        }

        Command::ApprovalConnectReject {
            request_id,
            error,
            reply,
        } => {
            let result = store::resolve_active_connect(state, Some(&request_id));
            let outcome = finish_resolution(
                inner,
                result.stale,
                result.resolved.map(|r| {
                    (
                        r.tab_id,
                        BackgroundToSite::ConnectResult {
                            request_id: r.request_id,
                            result: None,
                            error: Some(error.unwrap_or_else(|| "rejected".to_string())),
                        },
                    )
                }),
            )
            .await;
            persist(inner, &result.state).await;
            reopen_if_pending(inner, &result.state).await;
            let _ = reply.send(outcome);
            result.state
        }

        Command::ApprovalSignApprove {
            request_id,
            signature,
            reply,
        } => {
            let result = store::resolve_active_sign(state, Some(&request_id));
            let outcome = finish_resolution(
                inner,
                result.stale,
                result.resolved.map(|r| {
                    (
                        r.tab_id,
                        BackgroundToSite::SignResult {
                            request_id: r.request_id,
                            result: Some(Some(signature)),
                            error: None,
                        },
                    )
                }),
            )
            .await;
            persist(inner, &result.state).await;
            reopen_if_pending(inner, &result.state).await;
            let _ = reply.send(outcome);
            result.state
        }

        Command::ApprovalSignReject {
            request_id,
            error,
            reply,
        } => {
            let result = store::resolve_active_sign(state, Some(&request_id));
            let outcome = finish_resolution(
                inner,
                result.stale,
                result.resolved.map(|r| {
                    (
                        r.tab_id,
                        BackgroundToSite::SignResult {
                            request_id: r.request_id,
                            result: None,
                            error: Some(error.unwrap_or_else(|| "rejected".to_string())),
                        },
                    )
                }),
            )
            .await;
            persist(inner, &result.state).await;
            reopen_if_pending(inner, &result.state).await;
            let _ = reply.send(outcome);
            result.state
        }

        Command::TabClosed { tab_id, reply } => {
            let result = store::drop_for_tab(state, tab_id);
            for r in &result.removed_connect {
                inner
                    .tab_channel
                    .send(
                        tab_id,
                        BackgroundToSite::ConnectResult {
                            request_id: r.request_id.clone(),
                            result: None,
                            error: Some("tab closed".to_string()),
                        },
                    )
                    .await;
            }
            for r in &result.removed_sign {
                inner
                    .tab_channel
                    .send(
                        tab_id,
                        BackgroundToSite::SignResult {
                            request_id: r.request_id.clone(),
                            result: None,
                            error: Some("tab closed".to_string()),
                        },
                    )
                    .await;
            }
            inner.metrics.tab_closed_removed_total.fetch_add(
                (result.removed_connect.len() + result.removed_sign.len()) as u64,
                std::sync::atomic::Ordering::Relaxed,
            );
            persist(inner, &result.state).await;
            let _ = reply.send(());
            result.state
        }

        Command::TickExpiry { now, reply } => {
            let result = store::prune_expired(state, now, inner.config.ttl_ms);
            for r in &result.expired_connect {
                inner
                    .tab_channel
                    .send(
                        r.tab_id,
                        BackgroundToSite::ConnectResult {
                            request_id: r.request_id.clone(),
                            result: None,
                            error: Some("request timed out".to_string()),
                        },
                    )
                    .await;
            }
            for r in &result.expired_sign {
                inner
                    .tab_channel
                    .send(
                        r.tab_id,
                        BackgroundToSite::SignResult {
                            request_id: r.request_id.clone(),
                            result: None,
                            error: Some("request timed out".to_string()),
                        },
                    )
                    .await;
            }
            inner.metrics.expired_total.fetch_add(
                (result.expired_connect.len() + result.expired_sign.len()) as u64,
                std::sync::atomic::Ordering::Relaxed,
            );
            persist(inner, &result.state).await;
            let _ = reply.send(());
            result.state
        }
    }
}

fn admit_connect(
    inner: &Inner,
    state: PendingRequestState,
    origin: &OriginKey,
    now: u64,
) -> (PendingRequestState, ConnectAdmission) {
    let pruned = store::prune_expired(state, now, inner.config.ttl_ms);
    let state = pruned.state;
    if matches!(origin, OriginKey::Unknown) {
        inner.metrics.unknown_origin_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    if state.total_pending() >= inner.config.max_total_pending {
        return (state, ConnectAdmission::RejectedCapacity);
    }
    if state.count_for_origin(origin.as_str()) >= inner.config.max_per_origin {
        return (state, ConnectAdmission::RejectedPerOrigin);
    }
    (state, ConnectAdmission::Admitted)
}

fn admit_sign(
    inner: &Inner,
    state: PendingRequestState,
    origin: &OriginKey,
    now: u64,
) -> (PendingRequestState, SignAdmission) {
    let pruned = store::prune_expired(state, now, inner.config.ttl_ms);
    let state = pruned.state;
    if matches!(origin, OriginKey::Unknown) {
        inner.metrics.unknown_origin_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    if state.total_pending() >= inner.config.max_total_pending {
        return (state, SignAdmission::RejectedCapacity);
    }
    if state.count_for_origin(origin.as_str()) >= inner.config.max_per_origin {
        return (state, SignAdmission::RejectedPerOrigin);
    }
    (state, SignAdmission::Admitted)
}

async fn finish_resolution(
    inner: &Inner,
    stale: bool,
    delivery: Option<(u64, BackgroundToSite)>,
) -> ResolveOutcome {
    if stale {
        inner.metrics.resolved_stale_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return ResolveOutcome::Stale;
    }
    if let Some((tab_id, message)) = delivery {
        inner.tab_channel.send(tab_id, message).await;
    }
    inner.metrics.resolved_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    ResolveOutcome::Resolved
}

async fn reopen_if_pending(inner: &Inner, state: &PendingRequestState) {
    if state.total_pending() > 0 {
        if let Err(e) = inner.approval_surface.open().await {
            tracing::warn!(error = %e, "failed to reopen approval surface");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::surface::fakes::{FakeApprovalSurface, FakeTabChannel};
    use crate::queue::repo::InMemoryPendingRequestRepo;

    fn spawn_test_dispatcher(
        max_per_origin: usize,
    ) -> (
        DispatcherHandle,
        Arc<FakeTabChannel>,
        Arc<FakeApprovalSurface>,
    ) {
        let config = DispatcherConfig {
            max_total_pending: 20,
            max_per_origin,
            ttl_ms: 60_000,
            strict_global_order: false,
            expiry_tick_interval: std::time::Duration::from_secs(60),
            state_file: None,
        };
        let tab_channel = Arc::new(FakeTabChannel::default());
        let approval_surface = Arc::new(FakeApprovalSurface::default());
        let handle = spawn(
            PendingRequestState::default(),
            Arc::new(InMemoryPendingRequestRepo::new()),
            config,
            Arc::new(AllowList::new()),
            approval_surface.clone(),
            tab_channel.clone(),
            Arc::new(DispatcherMetrics::default()),
        );
        (handle, tab_channel, approval_surface)
    }

    #[tokio::test]
    async fn scenario_1_strict_queueing() {
        let (handle, tab_channel, _surface) = spawn_test_dispatcher(2);
        let origin = Some("https://a.test".to_string());

        let r1 = handle
            .site_connect("r1".to_string(), 1, origin.clone(), 0)
            .await;
        assert_eq!(r1, ConnectAdmission::Admitted);

        let r2 = handle
            .site_connect("r2".to_string(), 2, origin.clone(), 1)
            .await;
        assert_eq!(r2, ConnectAdmission::Admitted);

        let r3 = handle
            .site_connect("r3".to_string(), 3, origin.clone(), 2)
            .await;
        assert_eq!(r3, ConnectAdmission::RejectedPerOrigin);

        let outcome = handle
            .approve_connect(
                "r1".to_string(),
                "kaspa:q...".to_string(),
                "mainnet".to_string(),
            )
            .await;
        assert_eq!(outcome, ResolveOutcome::Resolved);

        let delivered = tab_channel.delivered.lock().unwrap();
        assert!(delivered.iter().any(|(tab, msg)| {
            *tab == 1
                && matches!(msg, BackgroundToSite::ConnectResult { request_id, result: Some(r), .. }
                    if request_id == "r1" && r.address == "kaspa:q...")
        }));
        drop(delivered);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.active_connect.unwrap().request_id, "r2");
    }

    #[tokio::test]
    async fn scenario_2_ttl_expiry() {
        let (handle, tab_channel, _surface) = spawn_test_dispatcher(5);
        handle
            .site_connect("r1".to_string(), 1, Some("https://a.test".to_string()), 0)
            .await;
        handle.tick_expiry(60_001).await;
        let delivered = tab_channel.delivered.lock().unwrap();
        assert!(delivered.iter().any(|(_, msg)| matches!(
            msg,
            BackgroundToSite::ConnectResult { request_id, error: Some(e), .. }
                if request_id == "r1" && e == "request timed out"
        )));
    }

    #[tokio::test]
    async fn stale_resolution_has_no_effect() {
        let (handle, tab_channel, _surface) = spawn_test_dispatcher(5);
        handle
            .site_connect("r1".to_string(), 1, Some("https://a.test".to_string()), 0)
            .await;
        let outcome = handle
            .approve_connect(
                "not-r1".to_string(),
                "kaspa:q...".to_string(),
                "mainnet".to_string(),
            )
            .await;
        assert_eq!(outcome, ResolveOutcome::Stale);
        assert!(tab_channel.delivered.lock().unwrap().is_empty());
        assert_eq!(handle.snapshot().active_connect.unwrap().request_id, "r1");
    }

    #[tokio::test]
    async fn fast_path_allow_list_skips_queue() {
        let (handle, tab_channel, _surface) = spawn_test_dispatcher(5);
        handle.allow_list.approve(
            "https://trusted.test".to_string(),
            ConnectResult {
                address: "kaspa:qtrusted".to_string(),
                network: "mainnet".to_string(),
            },
        );
        let outcome = handle
            .site_connect(
                "r1".to_string(),
                1,
                Some("https://trusted.test".to_string()),
                0,
            )
            .await;
        assert_eq!(outcome, ConnectAdmission::FastPathApproved);
        assert!(handle.snapshot().is_idle());
        let delivered = tab_channel.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn approval_surface_open_failure_rejects_just_enqueued_request() {
        let config = DispatcherConfig {
            max_total_pending: 20,
            max_per_origin: 5,
            ttl_ms: 60_000,
            strict_global_order: false,
            expiry_tick_interval: std::time::Duration::from_secs(60),
            state_file: None,
        };
        let tab_channel = Arc::new(FakeTabChannel::default());
        let approval_surface = Arc::new(FakeApprovalSurface {
            should_fail: true,
            open_count: std::sync::Mutex::new(0),
        });
        let handle = spawn(
            PendingRequestState::default(),
            Arc::new(InMemoryPendingRequestRepo::new()),
            config,
            Arc::new(AllowList::new()),
            approval_surface,
            tab_channel.clone(),
            Arc::new(DispatcherMetrics::default()),
        );
        handle
            .site_connect("r1".to_string(), 1, Some("https://a.test".to_string()), 0)
            .await;
        let delivered = tab_channel.delivered.lock().unwrap();
        assert!(delivered.iter().any(|(_, msg)| matches!(
            msg,
            BackgroundToSite::ConnectResult { error: Some(e), .. } if e == "open manually"
        )));
        drop(delivered);
        assert!(handle.snapshot().is_idle());
    }

    #[tokio::test]
    async fn tab_closed_removes_and_notifies_each_once() {
        let (handle, tab_channel, _surface) = spawn_test_dispatcher(5);
        handle
            .site_connect("r1".to_string(), 1, Some("https://a.test".to_string()), 0)
            .await;
        handle
            .site_connect("r2".to_string(), 1, Some("https://a.test".to_string()), 1)
            .await;
        handle.tab_closed(1).await;
        let delivered = tab_channel.delivered.lock().unwrap();
        let tab_closed_count = delivered
            .iter()
            .filter(|(_, msg)| matches!(msg, BackgroundToSite::ConnectResult { error: Some(e), .. } if e == "tab closed"))
            .count();
        assert_eq!(tab_closed_count, 2);
        assert!(handle.snapshot().is_idle());
    }
}
