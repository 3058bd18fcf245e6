//! Aggregate OpenAPI document for the two HTTP services (`spec.md` §6).
//!
//! Only the operationally-stable endpoints are annotated; the
//! request/response bodies documented in `spec.md` §6 are free-form JSON
//! at this layer (see each handler's doc comment for the exact shape) so
//! they are described in prose rather than `utoipa::ToSchema` derives.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::builder::service::health,
        crate::builder::service::metrics,
        crate::consumer::service::health,
        crate::consumer::service::metrics_handler,
    ),
    info(
        title = "ForgeOS execution pipeline core",
        version = "0.1.0",
        description = "Transaction-builder and callback-consumer HTTP surfaces for the Kaspa agent execution pipeline."
    )
)]
pub struct ApiDoc;
