use super::backend::{TxBuildRequest, TxBuilder};
use super::error::BuilderError;
use super::utxo::{UtxoSource, normalize_and_validate};
use super::validation::{validate_from_address, validate_network_id, validate_outputs, validate_wallet};
use crate::config::BuilderConfig;
use crate::metrics::BuilderMetrics;
use crate::money::Sompi;
use crate::policy::{FreshnessState, PolicyConfig, Telemetry, select};
use crate::telemetry::{SummaryCache, SummarySlot};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::Ordering;

pub struct BuilderState {
    pub config: BuilderConfig,
    pub policy_config: PolicyConfig,
    pub utxo_source: Arc<dyn UtxoSource>,
    pub tx_builder: Arc<dyn TxBuilder>,
    pub telemetry_cache: Option<Arc<SummaryCache>>,
    pub metrics: Arc<BuilderMetrics>,
}

pub fn router(state: Arc<BuilderState>) -> Router {
    Router::new()
        .route("/v1/kastle/build-tx-json", post(build_tx_json))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryOverride {
    #[serde(default)]
    observed_confirm_p95_ms: Option<u64>,
    #[serde(default)]
    daa_congestion_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputRequest {
    address: String,
    amount_kas: rust_decimal::Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTxJsonRequest {
    wallet: String,
    network_id: String,
    from_address: String,
    outputs: Vec<OutputRequest>,
    #[serde(default)]
    purpose: Option<String>,
    #[serde(default)]
    priority_fee_sompi: Option<u64>,
    #[serde(default)]
    telemetry: Option<TelemetryOverride>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildTxJsonResponse {
    tx_json: String,
    meta: BuildMeta,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildMeta {
    mode: &'static str,
    wallet: String,
    network_id: String,
    outputs: usize,
    from_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    txid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    utxo_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_kind: Option<&'static str>,
    policy: PolicyMeta,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyMeta {
    selection_mode: String,
    priority_fee_sompi: String,
    truncated: bool,
    fallback_used_all_inputs: bool,
    utxo_count: usize,
}

fn check_auth(config: &BuilderConfig, headers: &HeaderMap) -> Result<(), BuilderError> {
    if config.bearer_tokens.is_empty() && config.auth_headers.is_empty() {
        return Ok(());
    }
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if config.bearer_tokens.iter().any(|t| t == token) {
                return Ok(());
            }
        }
    }
    if let Some(token) = headers.get("x-tx-builder-token").and_then(|v| v.to_str().ok()) {
        if config.auth_headers.iter().any(|t| t == token) {
            return Ok(());
        }
    }
    Err(BuilderError::Unauthorized)
}

async fn build_tx_json(
    State(state): State<Arc<BuilderState>>,
    headers: HeaderMap,
    Json(request): Json<BuildTxJsonRequest>,
) -> Result<impl IntoResponse, BuilderError> {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let result = handle_build(&state, &headers, request).await;
    match &result {
        Ok(_) => {
            state.metrics.requests_accepted_total.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            state.metrics.requests_rejected_total.fetch_add(1, Ordering::Relaxed);
        }
    }
    result
}

async fn handle_build(
    state: &BuilderState,
    headers: &HeaderMap,
    request: BuildTxJsonRequest,
) -> Result<impl IntoResponse + use<>, BuilderError> {
    check_auth(&state.config, headers)?;
    validate_wallet(&request.wallet)?;
    validate_network_id(&request.network_id)?;
    validate_from_address(&request.from_address, &request.network_id)?;

    let output_pairs: Vec<(String, rust_decimal::Decimal)> = request
        .outputs
        .iter()
        .map(|o| (o.address.clone(), o.amount_kas))
        .collect();
    validate_outputs(&output_pairs)?;

    use crate::config::BuildMode;
    if state.config.mode == BuildMode::NotConfigured {
        return Err(BuilderError::NotConfigured);
    }

    let outputs_sompi: Vec<(String, Sompi)> = request
        .outputs
        .iter()
        .map(|o| Sompi::from_kas_ceil(o.amount_kas).map(|s| (o.address.clone(), s)))
        .collect::<Result<_, _>>()
        .map_err(|_| BuilderError::NonPositiveOutput)?;
    let outputs_total: Sompi = outputs_sompi.iter().map(|(_, s)| *s).sum();

    let result = match state.config.mode {
        BuildMode::LocalNative => build_local_native(state, &request, &outputs_sompi, outputs_total).await?,
        BuildMode::Command | BuildMode::Proxy | BuildMode::Manual => {
            let tx_request = TxBuildRequest {
                entries: &[],
                change_address: &request.from_address,
                outputs: &outputs_sompi,
                priority_fee: request.priority_fee_sompi.map(|v| Sompi::new(v as u128)).unwrap_or(Sompi::ZERO),
                network_id: &request.network_id,
            };
            let built = state.tx_builder.build(&tx_request).await?;
            (built, None, false)
        }
        BuildMode::NotConfigured => unreachable!(),
    };

    let (built, policy_meta, fallback_used) = result;
    let tx_json_str = serde_json::to_string(&built.tx_json).map_err(|e| BuilderError::Internal(e.to_string()))?;

    let meta = BuildMeta {
        mode: mode_str(state.config.mode),
        wallet: request.wallet,
        network_id: request.network_id,
        outputs: request.outputs.len(),
        from_address: request.from_address,
        txid: built.txid,
        utxo_count: policy_meta.as_ref().map(|p: &PolicyMeta| p.utxo_count),
        json_kind: Some("transaction"),
        policy: policy_meta.unwrap_or(PolicyMeta {
            selection_mode: "n/a".to_string(),
            priority_fee_sompi: "0".to_string(),
            truncated: false,
            fallback_used_all_inputs: fallback_used,
            utxo_count: 0,
        }),
    };

    Ok(Json(BuildTxJsonResponse {
        tx_json: tx_json_str,
        meta,
    }))
}

async fn build_local_native(
    state: &BuilderState,
    request: &BuildTxJsonRequest,
    outputs_sompi: &[(String, Sompi)],
    outputs_total: Sompi,
) -> Result<(super::backend::TxBuildResult, Option<PolicyMeta>, bool), BuilderError> {
    let raw_rows = state
        .utxo_source
        .fetch(&request.from_address, &request.network_id)
        .await
        .map_err(|e| {
            state.metrics.utxo_fetch_failures_total.fetch_add(1, Ordering::Relaxed);
            BuilderError::UtxoFetchFailed(e.to_string())
        })?;
    let (candidates, _rejected) = normalize_and_validate(raw_rows);

    let telemetry = resolve_telemetry(state, request).await?;

    let plan = select(
        &candidates,
        outputs_total,
        request.outputs.len(),
        request.priority_fee_sompi.map(|v| Sompi::new(v as u128)),
        telemetry,
        &state.policy_config,
    );

    let required = outputs_total.to_raw()
        + state.policy_config.estimated_network_fee_sompi
        + state.policy_config.extra_safety_buffer_sompi
        + plan.priority_fee.to_raw()
        + (plan.selected.len() as u128) * state.policy_config.per_input_fee_buffer_sompi;
    if plan.selected_amount.to_raw() < required {
        return Err(BuilderError::InsufficientFunds {
            selected: plan.selected_amount.to_raw(),
            required,
        });
    }

    let tx_request = TxBuildRequest {
        entries: &plan.selected,
        change_address: &request.from_address,
        outputs: outputs_sompi,
        priority_fee: plan.priority_fee,
        network_id: &request.network_id,
    };

    let (built, fallback_used) = match state.tx_builder.build(&tx_request).await {
        Ok(built) => (built, false),
        Err(_) if plan.selected.len() < candidates.len() => {
            state.metrics.fallback_used_all_inputs_total.fetch_add(1, Ordering::Relaxed);
            let full_request = TxBuildRequest {
                entries: &candidates,
                change_address: &request.from_address,
                outputs: outputs_sompi,
                priority_fee: plan.priority_fee,
                network_id: &request.network_id,
            };
            (state.tx_builder.build(&full_request).await?, true)
        }
        Err(e) => return Err(e),
    };

    let policy_meta = PolicyMeta {
        selection_mode: format!("{:?}", plan.selection_mode_used),
        priority_fee_sompi: plan.priority_fee.to_raw().to_string(),
        truncated: plan.truncated,
        fallback_used_all_inputs: fallback_used,
        utxo_count: if fallback_used { candidates.len() } else { plan.selected.len() },
    };
    Ok((built, Some(policy_meta), fallback_used))
}

async fn resolve_telemetry(
    state: &BuilderState,
    request: &BuildTxJsonRequest,
) -> Result<Option<Telemetry>, BuilderError> {
    let mut telemetry = Telemetry::default();
    if let Some(ov) = &request.telemetry {
        if let Some(p95) = ov.observed_confirm_p95_ms {
            telemetry.observed_confirm_p95_ms = Some(p95);
        }
        if let Some(pct) = ov.daa_congestion_pct {
            telemetry.daa_congestion_pct = Some(pct);
        }
    }

    if state.policy_config.priority_fee_mode != crate::policy::PriorityFeeMode::Adaptive {
        return Ok(Some(telemetry));
    }

    if let Some(cache) = &state.telemetry_cache {
        let snapshot = cache.get(SummarySlot::Callback).await;
        if let Some(cached) = snapshot.telemetry {
            if telemetry.observed_confirm_p95_ms.is_none() {
                telemetry.observed_confirm_p95_ms = cached.observed_confirm_p95_ms;
            }
            if telemetry.receipt_lag_ms.is_none() {
                telemetry.receipt_lag_ms = cached.receipt_lag_ms;
            }
            if telemetry.scheduler_callback_lag_ms.is_none() {
                telemetry.scheduler_callback_lag_ms = cached.scheduler_callback_lag_ms;
            }
        }
        telemetry.freshness_state = Some(snapshot.freshness);
        telemetry.freshness_max_age_ms = snapshot.age.map(|d| d.as_millis() as u64);

        if state.config.require_strict_telemetry_freshness {
            match snapshot.freshness {
                FreshnessState::Missing => {
                    state.metrics.telemetry_summary_missing_total.fetch_add(1, Ordering::Relaxed);
                    return Err(BuilderError::TelemetrySummaryMissingRequired);
                }
                FreshnessState::StaleHard => {
                    state.metrics.telemetry_summary_stale_hard_total.fetch_add(1, Ordering::Relaxed);
                    let age = telemetry.freshness_max_age_ms.unwrap_or(0);
                    return Err(BuilderError::TelemetrySummaryStaleHard(age as u128));
                }
                _ => {}
            }
        }
    } else if telemetry.freshness_state.is_none() {
        telemetry.freshness_state = Some(FreshnessState::NotRequired);
    }

    Ok(Some(telemetry))
}

fn mode_str(mode: crate::config::BuildMode) -> &'static str {
    use crate::config::BuildMode;
    match mode {
        BuildMode::LocalNative => "local",
        BuildMode::Command => "command",
        BuildMode::Proxy => "proxy",
        BuildMode::Manual => "manual",
        BuildMode::NotConfigured => "not_configured",
    }
}

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is healthy")))]
pub(crate) async fn health(State(state): State<Arc<BuilderState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "mode": mode_str(state.config.mode),
        "gitHash": env!("GIT_HASH"),
    }))
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, description = "Prometheus text exposition")))]
pub(crate) async fn metrics(State(state): State<Arc<BuilderState>>) -> impl IntoResponse {
    let mut out = String::new();
    state.metrics.render(&mut out);
    (StatusCode::OK, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::backend::fakes::FakeTxBuilder;
    use super::super::utxo::fakes::FakeUtxoSource;
    use super::super::utxo::RawUtxoRow;
    use crate::config::BuildMode;
    use crate::policy::PolicyConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state_with(mode: BuildMode, rows: Vec<RawUtxoRow>, should_fail: bool) -> Arc<BuilderState> {
        let mut config = BuilderConfig::from_env();
        config.mode = mode;
        Arc::new(BuilderState {
            config,
            policy_config: PolicyConfig::default(),
            utxo_source: Arc::new(FakeUtxoSource { rows }),
            tx_builder: Arc::new(FakeTxBuilder { should_fail }),
            telemetry_cache: None,
            metrics: Arc::new(BuilderMetrics::default()),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_configured_mode() {
        let app = router(state_with(BuildMode::LocalNative, vec![], false));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["mode"], "local");
        assert!(json["gitHash"].is_string());
    }

    #[tokio::test]
    async fn build_tx_json_rejects_non_positive_output() {
        let app = router(state_with(BuildMode::LocalNative, vec![], false));
        let payload = serde_json::json!({
            "wallet": "kastle",
            "networkId": "mainnet",
            "fromAddress": "kaspa:qz0source",
            "outputs": [{"address": "kaspa:qzdest", "amountKas": "0"}],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/kastle/build-tx-json")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn build_tx_json_selects_inputs_and_builds() {
        let rows = vec![RawUtxoRow {
            txid: "a".repeat(64),
            index: 0,
            amount: 50_000_000_000,
            script_hex: "76a914".to_string(),
            block_daa_score: 1,
        }];
        let app = router(state_with(BuildMode::LocalNative, rows, false));
        let payload = serde_json::json!({
            "wallet": "kastle",
            "networkId": "mainnet",
            "fromAddress": "kaspa:qz0source",
            "outputs": [{"address": "kaspa:qzdest", "amountKas": "1"}],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/kastle/build-tx-json")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meta"]["utxoCount"], 1);
    }

    #[tokio::test]
    async fn build_tx_json_rejects_when_mode_not_configured() {
        let app = router(state_with(BuildMode::NotConfigured, vec![], false));
        let payload = serde_json::json!({
            "wallet": "kastle",
            "networkId": "mainnet",
            "fromAddress": "kaspa:qz0source",
            "outputs": [{"address": "kaspa:qzdest", "amountKas": "1"}],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/kastle/build-tx-json")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
