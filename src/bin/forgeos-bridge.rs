//! Thin local-development HTTP shim over the popup dispatcher (component
//! B). There is no real browser host in a bare Rust process, so this
//! binary exposes [`forgeos_core::dispatcher::DispatcherHandle`] over
//! `fetch`-friendly JSON endpoints instead: a site-injected bridge
//! script or a test harness drives connect/sign requests the same way a
//! content script would post them to the background worker (`spec.md`
//! §4.B/§6.1).

use forgeos_core::config::{DispatcherConfig, LoggingConfig};
use forgeos_core::dispatcher::{
    AllowList, DispatcherHandle, LoggingApprovalSurface, LoggingTabChannel, actor,
};
use forgeos_core::logging;
use forgeos_core::metrics::DispatcherMetrics;
use forgeos_core::queue::{InMemoryPendingRequestRepo, JsonFilePendingRequestRepo, PendingRequestRepo, PendingRequestState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn scan_arg(name: &str) -> Option<String> {
    let flag = format!("--{name}");
    let args: Vec<String> = std::env::args().collect();
    args.iter().position(|a| a == &flag).and_then(|i| args.get(i + 1).cloned())
}

#[derive(Clone)]
struct BridgeState {
    handle: DispatcherHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = logging::init_logging(&logging_config);

    let config = DispatcherConfig::from_env();
    let repo: Arc<dyn PendingRequestRepo> = match &config.state_file {
        Some(path) => Arc::new(JsonFilePendingRequestRepo::new(path.clone())),
        None => Arc::new(InMemoryPendingRequestRepo::new()),
    };
    let initial_state = repo.read().await;

    let handle = actor::spawn(
        initial_state,
        repo,
        config.clone(),
        Arc::new(AllowList::new()),
        Arc::new(LoggingApprovalSurface),
        Arc::new(LoggingTabChannel),
        Arc::new(DispatcherMetrics::default()),
    );

    let expiry_handle = handle.clone();
    let tick_interval = config.expiry_tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis() as u64;
            expiry_handle.tick_expiry(now).await;
        }
    });

    let state = BridgeState { handle };
    let app = Router::new()
        .route("/site/connect", post(site_connect))
        .route("/site/sign", post(site_sign))
        .route("/approval/connect/approve", post(approve_connect))
        .route("/approval/connect/reject", post(reject_connect))
        .route("/approval/sign/approve", post(approve_sign))
        .route("/approval/sign/reject", post(reject_sign))
        .route("/tab/closed", post(tab_closed))
        .route("/snapshot", get(snapshot))
        .route("/health", get(health))
        .with_state(state);

    let bind_addr = scan_arg("port")
        .map(|p| format!("0.0.0.0:{p}"))
        .unwrap_or_else(|| "0.0.0.0:8789".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "forgeos-bridge listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteConnectRequest {
    request_id: String,
    tab_id: u64,
    #[serde(default)]
    origin: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteSignRequest {
    request_id: String,
    tab_id: u64,
    #[serde(default)]
    origin: Option<String>,
    message: String,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

async fn site_connect(State(state): State<BridgeState>, Json(req): Json<SiteConnectRequest>) -> impl IntoResponse {
    let admission = state
        .handle
        .site_connect(req.request_id, req.tab_id, req.origin, now_ms())
        .await;
    Json(serde_json::json!({ "admission": format!("{admission:?}") }))
}

async fn site_sign(State(state): State<BridgeState>, Json(req): Json<SiteSignRequest>) -> impl IntoResponse {
    let admission = state
        .handle
        .site_sign(req.request_id, req.tab_id, req.origin, req.message, now_ms())
        .await;
    Json(serde_json::json!({ "admission": format!("{admission:?}") }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveConnectRequest {
    request_id: String,
    address: String,
    network: String,
}

async fn approve_connect(State(state): State<BridgeState>, Json(req): Json<ApproveConnectRequest>) -> impl IntoResponse {
    let outcome = state.handle.approve_connect(req.request_id, req.address, req.network).await;
    Json(serde_json::json!({ "outcome": format!("{outcome:?}") }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    request_id: String,
    #[serde(default)]
    error: Option<String>,
}

async fn reject_connect(State(state): State<BridgeState>, Json(req): Json<RejectRequest>) -> impl IntoResponse {
    let outcome = state.handle.reject_connect(req.request_id, req.error).await;
    Json(serde_json::json!({ "outcome": format!("{outcome:?}") }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveSignRequest {
    request_id: String,
    signature: String,
}

async fn approve_sign(State(state): State<BridgeState>, Json(req): Json<ApproveSignRequest>) -> impl IntoResponse {
    let outcome = state.handle.approve_sign(req.request_id, req.signature).await;
    Json(serde_json::json!({ "outcome": format!("{outcome:?}") }))
}

async fn reject_sign(State(state): State<BridgeState>, Json(req): Json<RejectRequest>) -> impl IntoResponse {
    let outcome = state.handle.reject_sign(req.request_id, req.error).await;
    Json(serde_json::json!({ "outcome": format!("{outcome:?}") }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabClosedRequest {
    tab_id: u64,
}

async fn tab_closed(State(state): State<BridgeState>, Json(req): Json<TabClosedRequest>) -> impl IntoResponse {
    state.handle.tab_closed(req.tab_id).await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct SnapshotResponse {
    state: PendingRequestState,
}

async fn snapshot(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(SnapshotResponse { state: state.handle.snapshot() })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "gitHash": env!("GIT_HASH") }))
}
