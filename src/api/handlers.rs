//! HTTP request handlers with OpenAPI documentation.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;

use super::admin::JobTriggerResponse;
use crate::app::AppState;
use crate::domain::{
    AppError, ArchiveReason, ArchivedInteraction, BlockchainError, DatabaseError, ErrorDetail,
    ErrorResponse, HealthResponse, HealthStatus, InteractionStatus, NewInteraction,
    PendingInteraction, PushInteractionsRequest, PushInteractionsResponse, PushedInteraction,
    QueueStats, RateLimitResponse, ValidationError, WalletHistory,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Interaction Relayer API",
        version = "0.1.0",
        description = "API for queueing user interactions and operating the relay pipeline",
        license(
            name = "MIT"
        )
    ),
    paths(
        push_interactions_handler,
        queue_stats_handler,
        wallet_history_handler,
        crate::api::admin::archive_interaction_handler,
        crate::api::admin::trigger_job_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            NewInteraction,
            PushInteractionsRequest,
            PushInteractionsResponse,
            PendingInteraction,
            PushedInteraction,
            ArchivedInteraction,
            InteractionStatus,
            ArchiveReason,
            QueueStats,
            WalletHistory,
            JobTriggerResponse,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "interactions", description = "Interaction queue endpoints"),
        (name = "admin", description = "Operator endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Queue a batch of interactions
///
/// Rows enter the pipeline as `pending` and are picked up by the simulation
/// job. An interaction already queued with the same wallet, product, type and
/// payload is ignored, so `inserted` may be lower than the number sent.
#[utoipa::path(
    post,
    path = "/interactions",
    tag = "interactions",
    request_body = PushInteractionsRequest,
    responses(
        (status = 200, description = "Interactions queued", body = PushInteractionsResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Database unavailable", body = ErrorResponse)
    )
)]
pub async fn push_interactions_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PushInteractionsRequest>,
) -> Result<Json<PushInteractionsResponse>, AppError> {
    let response = state.service.push_interactions(&payload).await?;
    Ok(Json(response))
}

/// Queue depth per status
#[utoipa::path(
    get,
    path = "/interactions/stats",
    tag = "interactions",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStats),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn queue_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.service.queue_stats().await?))
}

/// Every interaction recorded for a wallet
#[utoipa::path(
    get,
    path = "/wallets/{wallet}/interactions",
    tag = "interactions",
    params(
        ("wallet" = String, Path, description = "Hex wallet address")
    ),
    responses(
        (status = 200, description = "Pending, pushed and archived rows", body = WalletHistory),
        (status = 400, description = "Invalid wallet address", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn wallet_history_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<WalletHistory>, AppError> {
    let wallet = Address::from_str(&wallet).map_err(|e| {
        AppError::Validation(ValidationError::InvalidField {
            field: "wallet".to_string(),
            message: e.to_string(),
        })
    })?;
    Ok(Json(state.service.wallet_history(wallet).await?))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "blockchain_error",
                    self.to_string(),
                ),
                BlockchainError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "blockchain_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Signing(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "signing_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
