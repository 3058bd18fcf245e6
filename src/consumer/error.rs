use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Every error the consumer service can report, mapped to an HTTP
/// status per `spec.md` §7's error-kind table.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("txid must be 64 lowercase hex characters")]
    InvalidTxid,
    #[error("unknown consistency status: {0}")]
    InvalidConsistencyStatus(String),
    #[error("cycle event is missing agentKey, idempotencyKey or fenceToken")]
    MissingCycleFields,
    #[error("fence decision backend failed: {0}")]
    FenceStoreFailed(String),
    #[error("max SSE clients reached")]
    SseCapacityExceeded,
    #[error("unauthorized")]
    Unauthorized,
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

impl ConsumerError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTxid => "invalid_txid",
            Self::InvalidConsistencyStatus(_) => "invalid_consistency_status",
            Self::MissingCycleFields => "missing_cycle_fields",
            Self::FenceStoreFailed(_) => "fence_store_failed",
            Self::SseCapacityExceeded => "sse_capacity_exceeded",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTxid | Self::InvalidConsistencyStatus(_) | Self::MissingCycleFields => StatusCode::BAD_REQUEST,
            Self::FenceStoreFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SseCapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ConsumerError {
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
