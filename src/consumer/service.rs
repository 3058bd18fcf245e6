use super::error::ConsumerError;
use super::fence::{FenceDecision, FenceStore};
use super::idempotency::IdempotencyGuard;
use super::model::{
    ConfirmTsSource, ConsistencyReport, ConsistencyStatus, ExecutionReceipt, RecentEvent,
    ReceiptStatus, MAX_MISMATCH_KINDS,
};
use super::sse::{ReceiptBroadcast, ReceiptFilter};
use super::store::{EventStore, ReceiptRepo, ReceiptStore, Ring};
use super::summary::{build_summary, CycleIngestionSample};
use crate::config::ConsumerConfig;
use crate::metrics::ConsumerMetrics;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

pub struct ConsumerState {
    pub config: ConsumerConfig,
    pub fence_store: Arc<dyn FenceStore>,
    pub receipt_idempotency: Arc<dyn IdempotencyGuard>,
    pub receipt_store: Arc<ReceiptStore>,
    pub receipt_repo: Arc<dyn ReceiptRepo>,
    pub event_store: Arc<EventStore>,
    pub broadcast: Arc<ReceiptBroadcast>,
    pub metrics: Arc<ConsumerMetrics>,
    pub cycle_samples: Ring<CycleIngestionSample>,
    pub consistency_samples: Ring<ConsistencyStatus>,
}

pub fn router(state: Arc<ConsumerState>) -> Router {
    Router::new()
        .route("/v1/scheduler/cycle", post(scheduler_cycle))
        .route("/v1/execution-receipts", post(post_receipt).get(get_receipts))
        .route("/v1/execution-receipts/stream", get(stream_receipts))
        .route("/v1/receipt-consistency", post(post_consistency))
        .route("/v1/telemetry-summary", get(telemetry_summary))
        .route("/v1/events", get(get_events))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------
// POST /v1/scheduler/cycle
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CycleCycleRequest {
    scheduler: serde_json::Value,
    agent: serde_json::Value,
    #[serde(default)]
    agent_key: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    fence_token: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CycleResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fence_advanced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_fence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    received_fence: Option<u64>,
}

async fn scheduler_cycle(
    State(state): State<Arc<ConsumerState>>,
    headers: HeaderMap,
    Json(req): Json<CycleCycleRequest>,
) -> Result<impl IntoResponse, ConsumerError> {
    let agent_key = header_str(&headers, "x-agent-key")
        .map(str::to_string)
        .or(req.agent_key.clone())
        .ok_or(ConsumerError::MissingCycleFields)?;
    let idempotency_key = header_str(&headers, "idempotency-key")
        .map(str::to_string)
        .or(req.idempotency_key.clone())
        .ok_or(ConsumerError::MissingCycleFields)?;
    let fence_token = header_str(&headers, "x-fence-token")
        .and_then(|v| v.parse::<u64>().ok())
        .or(req.fence_token)
        .ok_or(ConsumerError::MissingCycleFields)?;

    let (decision, fail_open) = state
        .fence_store
        .decide(&agent_key, &idempotency_key, fence_token, state.config.idempotency_ttl)
        .await
        .map_err(|e| ConsumerError::FenceStoreFailed(e.to_string()))?;

    if fail_open {
        state.metrics.redis_fail_open_total.fetch_add(1, Ordering::Relaxed);
    }

    let ts = now_ms();
    match decision {
        FenceDecision::Duplicate => {
            state.metrics.cycle_events_duplicate_total.fetch_add(1, Ordering::Relaxed);
            state.cycle_samples.push(CycleIngestionSample { accepted: false, ts_ms: ts });
            Ok((
                StatusCode::OK,
                Json(CycleResponse {
                    duplicate: Some(true),
                    accepted: None,
                    fence_advanced: None,
                    current_fence: None,
                    received_fence: None,
                }),
            ))
        }
        FenceDecision::Stale { current_fence, received_fence } => {
            state.metrics.cycle_events_stale_total.fetch_add(1, Ordering::Relaxed);
            state.cycle_samples.push(CycleIngestionSample { accepted: false, ts_ms: ts });
            state.event_store.push(RecentEvent::CycleStale {
                agent_key,
                fence_token: received_fence,
                current_fence,
                ts,
            });
            Ok((
                StatusCode::CONFLICT,
                Json(CycleResponse {
                    duplicate: None,
                    accepted: Some(false),
                    fence_advanced: None,
                    current_fence: Some(current_fence),
                    received_fence: Some(received_fence),
                }),
            ))
        }
        FenceDecision::Accepted { fence_advanced } => {
            state.metrics.cycle_events_accepted_total.fetch_add(1, Ordering::Relaxed);
            state.cycle_samples.push(CycleIngestionSample { accepted: true, ts_ms: ts });
            state.event_store.push(RecentEvent::CycleAccepted {
                agent_key,
                fence_token,
                ts,
            });
            Ok((
                StatusCode::OK,
                Json(CycleResponse {
                    duplicate: None,
                    accepted: Some(true),
                    fence_advanced: Some(fence_advanced),
                    current_fence: None,
                    received_fence: None,
                }),
            ))
        }
    }
}

// ---------------------------------------------------------------------
// POST/GET /v1/execution-receipts
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionReceiptRequest {
    txid: String,
    #[serde(default)]
    agent_key: Option<String>,
    status: ReceiptStatus,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    fee_sompi: Option<String>,
    #[serde(default)]
    broadcast_ts: Option<i64>,
    #[serde(default)]
    confirm_ts: Option<i64>,
    #[serde(default)]
    confirm_ts_source: Option<ConfirmTsSource>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

fn is_valid_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Serialize)]
struct ReceiptAcceptResponse {
    duplicate: bool,
}

async fn post_receipt(
    State(state): State<Arc<ConsumerState>>,
    Json(req): Json<ExecutionReceiptRequest>,
) -> Result<impl IntoResponse, ConsumerError> {
    if !is_valid_txid(&req.txid) {
        return Err(ConsumerError::InvalidTxid);
    }
    let txid = req.txid.to_lowercase();
    let idempotency_key = req.idempotency_key.clone().unwrap_or_else(|| format!("receipt:{txid}"));

    let is_new = state
        .receipt_idempotency
        .check_and_set(&idempotency_key, state.config.receipt_ttl)
        .await;

    if !is_new {
        state.metrics.receipts_duplicate_total.fetch_add(1, Ordering::Relaxed);
        return Ok((StatusCode::OK, Json(ReceiptAcceptResponse { duplicate: true })));
    }

    let receipt = ExecutionReceipt {
        txid: txid.clone(),
        agent_key: req.agent_key,
        status: req.status,
        confirmations: req.confirmations,
        fee_sompi: req.fee_sompi,
        broadcast_ts: req.broadcast_ts,
        confirm_ts: req.confirm_ts,
        confirm_ts_source: req.confirm_ts_source,
        updated_at: now_ms(),
    };

    state.receipt_store.upsert(receipt.clone());
    if let Err(e) = state.receipt_repo.upsert(&receipt).await {
        tracing::error!(error = %e, txid = %txid, "failed to persist execution receipt");
        state.metrics.internal_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    state.broadcast.publish(receipt);
    state.metrics.receipts_accepted_total.fetch_add(1, Ordering::Relaxed);

    Ok((StatusCode::OK, Json(ReceiptAcceptResponse { duplicate: false })))
}

#[derive(Debug, Deserialize)]
struct ReceiptsQuery {
    #[serde(default)]
    txid: Option<String>,
}

async fn get_receipts(
    State(state): State<Arc<ConsumerState>>,
    Query(query): Query<ReceiptsQuery>,
) -> Result<impl IntoResponse, ConsumerError> {
    if let Some(txid) = query.txid {
        if !is_valid_txid(&txid) {
            return Err(ConsumerError::InvalidTxid);
        }
        let txid = txid.to_lowercase();
        return match state.receipt_store.get(&txid) {
            Some(receipt) => Ok((StatusCode::OK, Json(serde_json::json!(receipt)))),
            None => Ok((StatusCode::NOT_FOUND, Json(serde_json::json!({"error": {"message": "not found"}})))),
        };
    }
    Ok((StatusCode::OK, Json(serde_json::json!({ "receipts": state.receipt_store.recent() }))))
}

// ---------------------------------------------------------------------
// GET /v1/execution-receipts/stream
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    agent_key: Option<String>,
    #[serde(default)]
    replay: Option<u8>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptEventPayload {
    receipt: ExecutionReceipt,
    replay: bool,
}

async fn stream_receipts(
    State(state): State<Arc<ConsumerState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ConsumerError> {
    if !state.config.stream_tokens.is_empty() {
        let authorized = query
            .token
            .as_deref()
            .is_some_and(|t| state.config.stream_tokens.iter().any(|allowed| allowed == t));
        if !authorized {
            return Err(ConsumerError::Unauthorized);
        }
    }

    let (guard, rx) = state.broadcast.subscribe().map_err(|_| {
        state.metrics.sse_clients_rejected_total.fetch_add(1, Ordering::Relaxed);
        ConsumerError::SseCapacityExceeded
    })?;
    state.metrics.sse_clients_current.store(state.broadcast.client_count() as u64, Ordering::Relaxed);

    let filter = ReceiptFilter {
        txid: query.txid.clone(),
        agent_key: query.agent_key.clone(),
    };

    let replay_list = if query.replay == Some(1) {
        let limit = query.limit.unwrap_or(state.config.sse_replay_cap).min(state.config.sse_replay_cap);
        state
            .receipt_store
            .tail(limit)
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect()
    } else {
        Vec::new()
    };

    let ready_event = stream::once(async { Ok(Event::default().event("ready").data("{}")) });

    let replay_stream = stream::iter(replay_list.into_iter().map(|receipt| {
        let payload = ReceiptEventPayload { receipt, replay: true };
        Ok(Event::default().event("receipt").json_data(payload).expect("serializable payload"))
    }));

    let live_filter = filter;
    let live_stream = BroadcastStream::new(rx).filter_map(move |item| {
        let filter = live_filter.clone();
        async move {
            match item {
                Ok(receipt) if filter.matches(&receipt) => {
                    let payload = ReceiptEventPayload { receipt, replay: false };
                    Some(Ok(Event::default().event("receipt").json_data(payload).expect("serializable payload")))
                }
                _ => None,
            }
        }
    });

    let broadcast_ref = state.broadcast.clone();
    let heartbeat_interval = state.config.sse_heartbeat_interval;
    let combined = ready_event.chain(replay_stream).chain(live_stream).map(move |item| {
        // `guard` and `broadcast_ref` are kept alive for the stream's
        // lifetime and released together when the client disconnects.
        let _ = (&guard, &broadcast_ref);
        item
    });

    Ok(Sse::new(combined).keep_alive(KeepAlive::new().interval(heartbeat_interval).text("keep-alive")))
}

// ---------------------------------------------------------------------
// POST /v1/receipt-consistency
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConsistencyRequest {
    #[serde(default)]
    txid: Option<String>,
    status: String,
    #[serde(default)]
    mismatches: Vec<String>,
}

async fn post_consistency(
    State(state): State<Arc<ConsumerState>>,
    Json(req): Json<ConsistencyRequest>,
) -> Result<impl IntoResponse, ConsumerError> {
    let status = match req.status.as_str() {
        "consistent" => ConsistencyStatus::Consistent,
        "mismatch" => ConsistencyStatus::Mismatch,
        "insufficient" => ConsistencyStatus::Insufficient,
        other => return Err(ConsumerError::InvalidConsistencyStatus(other.to_string())),
    };

    let mut mismatches = req.mismatches;
    mismatches.truncate(MAX_MISMATCH_KINDS);

    let ts = now_ms();
    let report = ConsistencyReport {
        txid: req.txid.clone(),
        status,
        mismatches: mismatches.clone(),
        ts,
    };

    state.consistency_samples.push(status);
    state.metrics.consistency_reports_total.fetch_add(1, Ordering::Relaxed);
    if status == ConsistencyStatus::Mismatch {
        state.metrics.consistency_mismatches_total.fetch_add(1, Ordering::Relaxed);
        state.event_store.push(RecentEvent::ConsistencyMismatch {
            txid: req.txid,
            mismatches,
            ts,
        });
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "ok": true, "report": report }))))
}

// ---------------------------------------------------------------------
// GET /v1/telemetry-summary, /v1/events, /health, /metrics
// ---------------------------------------------------------------------

async fn telemetry_summary(State(state): State<Arc<ConsumerState>>) -> impl IntoResponse {
    let summary = build_summary(
        &state.receipt_store.recent(),
        now_ms(),
        &state.cycle_samples.snapshot(),
        &state.consistency_samples.snapshot(),
    );
    Json(summary)
}

async fn get_events(State(state): State<Arc<ConsumerState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "events": state.event_store.recent() }))
}

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is healthy")))]
pub(crate) async fn health(State(state): State<Arc<ConsumerState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sseClients": state.broadcast.client_count(),
        "gitHash": env!("GIT_HASH"),
    }))
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, description = "Prometheus text exposition")))]
pub(crate) async fn metrics_handler(State(state): State<Arc<ConsumerState>>) -> impl IntoResponse {
    let mut out = String::new();
    state.metrics.render(&mut out);
    (StatusCode::OK, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::fence::InMemoryFenceStore;
    use super::super::idempotency::InMemoryIdempotencyGuard;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> Arc<ConsumerState> {
        Arc::new(ConsumerState {
            config: ConsumerConfig::from_env(),
            fence_store: Arc::new(InMemoryFenceStore::new()),
            receipt_idempotency: Arc::new(InMemoryIdempotencyGuard::new()),
            receipt_store: Arc::new(ReceiptStore::new(100)),
            receipt_repo: Arc::new(super::super::store::InMemoryReceiptRepo),
            event_store: Arc::new(EventStore::new(100)),
            broadcast: Arc::new(ReceiptBroadcast::new(10, 100)),
            metrics: Arc::new(ConsumerMetrics::default()),
            cycle_samples: Ring::new(100),
            consistency_samples: Ring::new(100),
        })
    }

    async fn post(app: Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn cycle_payload(fence_token: u64) -> serde_json::Value {
        serde_json::json!({
            "scheduler": {},
            "agent": {},
            "agentKey": "agent-1",
            "idempotencyKey": "cyc-1",
            "fenceToken": fence_token,
        })
    }

    #[tokio::test]
    async fn stale_fence_token_is_rejected_with_409() {
        let state = test_state();
        let app = router(state);
        let first = post(app.clone(), "/v1/scheduler/cycle", cycle_payload(5)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let regressed = post(
            app,
            "/v1/scheduler/cycle",
            serde_json::json!({
                "scheduler": {},
                "agent": {},
                "agentKey": "agent-1",
                "idempotencyKey": "cyc-2",
                "fenceToken": 3,
            }),
        )
        .await;
        assert_eq!(regressed.status(), StatusCode::CONFLICT);
        let json = body_json(regressed).await;
        assert_eq!(json["currentFence"], 5);
        assert_eq!(json["receivedFence"], 3);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_a_no_op() {
        let state = test_state();
        let app = router(state);
        let first = post(app.clone(), "/v1/scheduler/cycle", cycle_payload(1)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = post(app, "/v1/scheduler/cycle", cycle_payload(1)).await;
        assert_eq!(second.status(), StatusCode::OK);
        let json = body_json(second).await;
        assert_eq!(json["duplicate"], true);
    }

    #[tokio::test]
    async fn execution_receipt_roundtrips_through_store() {
        let state = test_state();
        let app = router(state);
        let txid = "a".repeat(64);
        let receipt_payload = serde_json::json!({
            "txid": txid,
            "status": "confirmed",
            "confirmations": 10,
        });

        let accepted = post(app.clone(), "/v1/execution-receipts", receipt_payload.clone()).await;
        assert_eq!(accepted.status(), StatusCode::OK);
        let json = body_json(accepted).await;
        assert_eq!(json["duplicate"], false);

        let duplicate = post(app.clone(), "/v1/execution-receipts", receipt_payload).await;
        let json = body_json(duplicate).await;
        assert_eq!(json["duplicate"], true);

        let fetched = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/execution-receipts?txid={txid}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_txid_is_rejected() {
        let state = test_state();
        let app = router(state);
        let response = post(
            app,
            "/v1/execution-receipts",
            serde_json::json!({ "txid": "not-hex", "status": "confirmed" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_zero_sse_clients_on_startup() {
        let state = test_state();
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sseClients"], 0);
    }
}
