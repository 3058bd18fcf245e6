use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Every error the builder service can report, mapped to an HTTP status
/// per `spec.md` §7's error-kind table. Validation and capacity/timeout
/// kinds that never retry automatically are 400; upstream/internal kinds
/// that the caller can usefully retry are 502/504/500.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("unsupported wallet: {0}")]
    UnsupportedWallet(String),
    #[error("unsupported network id: {0}")]
    UnsupportedNetwork(String),
    #[error("invalid from address")]
    InvalidAddress,
    #[error("outputs must not be empty")]
    EmptyOutputs,
    #[error("output amount must be positive")]
    NonPositiveOutput,
    #[error("request body exceeded {0} bytes")]
    BodyTooLarge(usize),
    #[error("transaction builder not configured")]
    NotConfigured,
    #[error("unauthorized")]
    Unauthorized,
    #[error("telemetry summary missing and strict freshness is required")]
    TelemetrySummaryMissingRequired,
    #[error("telemetry summary stale beyond hard threshold ({0}ms)")]
    TelemetrySummaryStaleHard(u128),
    #[error("failed to fetch utxos: {0}")]
    UtxoFetchFailed(String),
    #[error("selected inputs ({selected}) do not cover the requested outputs plus fees ({required})")]
    InsufficientFunds { selected: u128, required: u128 },
    #[error("native transaction builder failed: {0}")]
    NativeBuildFailed(String),
    #[error("request exceeded the {0:?} budget")]
    Timeout(std::time::Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
    code: &'static str,
}

impl BuilderError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedWallet(_) => "unsupported_wallet",
            Self::UnsupportedNetwork(_) => "unsupported_network",
            Self::InvalidAddress => "invalid_address",
            Self::EmptyOutputs => "empty_outputs",
            Self::NonPositiveOutput => "non_positive_output",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::NotConfigured => "tx_builder_not_configured",
            Self::Unauthorized => "unauthorized",
            Self::TelemetrySummaryMissingRequired => "telemetry_summary_missing_required",
            Self::TelemetrySummaryStaleHard(_) => "telemetry_summary_stale_hard",
            Self::UtxoFetchFailed(_) => "utxo_fetch_failed",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::NativeBuildFailed(_) => "native_build_failed",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedWallet(_)
            | Self::UnsupportedNetwork(_)
            | Self::InvalidAddress
            | Self::EmptyOutputs
            | Self::NonPositiveOutput
            | Self::BodyTooLarge(_)
            | Self::NotConfigured
            | Self::InsufficientFunds { .. }
            | Self::TelemetrySummaryMissingRequired
            | Self::TelemetrySummaryStaleHard(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UtxoFetchFailed(_) => StatusCode::BAD_GATEWAY,
            Self::NativeBuildFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BuilderError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = ErrorBody {
            error: ErrorMessage {
                message: self.to_string(),
                code,
            },
        };
        (status, Json(body)).into_response()
    }
}
