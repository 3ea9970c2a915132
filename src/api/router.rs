//! Router construction and request rate limiting.

use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{
    DefaultDirectRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::admin::{archive_interaction_handler, trigger_job_handler};
use super::handlers::{
    ApiDoc, health_check_handler, liveness_handler, push_interactions_handler,
    queue_stats_handler, readiness_handler, wallet_history_handler,
};
use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

/// Global request quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_second: NonZeroU32,
    pub burst_size: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            burst_size: NonZeroU32::new(20).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RateLimitConfig {
    /// Read `RATE_LIMIT_RPS` and `RATE_LIMIT_BURST`, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            requests_per_second: read_non_zero("RATE_LIMIT_RPS")
                .unwrap_or(defaults.requests_per_second),
            burst_size: read_non_zero("RATE_LIMIT_BURST").unwrap_or(defaults.burst_size),
        }
    }

    fn quota(&self) -> Quota {
        Quota::per_second(self.requests_per_second).allow_burst(self.burst_size)
    }
}

fn read_non_zero(key: &str) -> Option<NonZeroU32> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .and_then(NonZeroU32::new)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/interactions", post(push_interactions_handler))
        .route("/interactions/stats", get(queue_stats_handler))
        .route("/wallets/{wallet}/interactions", get(wallet_history_handler))
        .route(
            "/admin/interactions/{id}/archive",
            post(archive_interaction_handler),
        )
        .route("/admin/jobs/{name}/trigger", post(trigger_job_handler))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
}

fn finish(router: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    router
        .merge(health_routes())
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Build the router without rate limiting
pub fn create_router(state: Arc<AppState>) -> Router {
    finish(api_routes(), state)
}

/// Build the router with a global quota on the API routes.
///
/// Health probes stay outside the limiter so orchestrators never see 429.
pub fn create_router_with_rate_limit(state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let limiter = Arc::new(RateLimiter::direct(config.quota()));
    let limited = api_routes().layer(middleware::from_fn_with_state(limiter, rate_limit));
    finish(limited, state)
}

async fn rate_limit(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait.as_secs().max(1);
            warn!(path = %request.uri().path(), retry_after, "Rate limit exceeded");
            let body = Json(RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
                retry_after,
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                body,
            )
                .into_response()
        }
    }
}
