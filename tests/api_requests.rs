//! Request flows through the public router.

use alloy::primitives::{Address, B256, Bytes};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::num::NonZeroU32;
use std::sync::Arc;
use tower::ServiceExt;

use interaction_relayer::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use interaction_relayer::app::{AppState, Job, JobConfig, JobScheduler, SignalBus};
use interaction_relayer::domain::{
    AppError, InteractionStatus, NewInteraction, QueueStats, WalletHistory,
};
use interaction_relayer::test_utils::{MockChain, MockInteractionStore};

struct Harness {
    store: Arc<MockInteractionStore>,
    chain: Arc<MockChain>,
    state: Arc<AppState>,
}

fn harness() -> Harness {
    let store = Arc::new(MockInteractionStore::new());
    let chain = Arc::new(MockChain::new());
    let state = Arc::new(AppState::new(
        store.clone(),
        chain.clone(),
        Arc::new(SignalBus::new()),
    ));
    Harness {
        store,
        chain,
        state,
    }
}

fn payload(wallet: u8, data: &str) -> Value {
    json!({
        "wallet": Address::repeat_byte(wallet),
        "product_id": B256::repeat_byte(0x01),
        "type_denominator": 1,
        "interaction_data": data,
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_push_then_read_history_and_stats() {
    let h = harness();
    let router = create_router(h.state.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/interactions",
            json!({ "interactions": [payload(0x11, "0x01"), payload(0x11, "0x02")] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["inserted"], 2);

    let response = router
        .clone()
        .oneshot(get(&format!(
            "/wallets/{}/interactions",
            Address::repeat_byte(0x11)
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history: WalletHistory = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(history.pending.len(), 2);
    assert!(history.pushed.is_empty());
    assert!(
        history
            .pending
            .iter()
            .all(|row| row.status == InteractionStatus::Pending)
    );

    let response = router.oneshot(get("/interactions/stats")).await.unwrap();
    let stats: QueueStats = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.locked, 0);
}

#[tokio::test]
async fn test_duplicate_push_is_ignored() {
    let h = harness();
    let router = create_router(h.state.clone());
    let body = json!({ "interactions": [payload(0x22, "0xbeef")] });

    router
        .clone()
        .oneshot(post_json("/interactions", body.clone()))
        .await
        .unwrap();
    let response = router
        .oneshot(post_json("/interactions", body))
        .await
        .unwrap();

    assert_eq!(body_json(response).await["inserted"], 0);
    assert_eq!(h.store.pending_rows().len(), 1);
}

#[tokio::test]
async fn test_push_validation_errors() {
    let h = harness();
    let router = create_router(h.state);

    let response = router
        .clone()
        .oneshot(post_json("/interactions", json!({ "interactions": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "validation_error");

    let response = router
        .oneshot(post_json(
            "/interactions",
            json!({ "interactions": [payload(0x00, "0x01")] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_wallet_path_is_rejected() {
    let h = harness();
    let response = create_router(h.state)
        .oneshot(get("/wallets/not-an-address/interactions"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_archive() {
    let h = harness();
    let router = create_router(h.state.clone());
    let interaction = NewInteraction::new(
        Address::repeat_byte(0x33),
        B256::ZERO,
        0,
        Bytes::from(vec![1]),
    );
    let free = h.store.seed(interaction.clone(), InteractionStatus::Failed);
    let locked = h.store.seed(
        NewInteraction {
            interaction_data: Bytes::from(vec![2]),
            ..interaction
        },
        InteractionStatus::Pending,
    );
    h.store.set_locked_at(locked, Some(Utc::now()));

    let archive = |id: i64| {
        Request::builder()
            .method("POST")
            .uri(format!("/admin/interactions/{}/archive", id))
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(archive(free)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(h.store.row(free).is_none());

    let response = router.clone().oneshot(archive(locked)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = router.oneshot(archive(9_999)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

struct NoopJob;

#[async_trait::async_trait]
impl Job for NoopJob {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn run(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_admin_trigger_job() {
    let h = harness();
    let trigger = |name: &str| {
        Request::builder()
            .method("POST")
            .uri(format!("/admin/jobs/{}/trigger", name))
            .body(Body::empty())
            .unwrap()
    };

    // Without a scheduler the endpoint is unavailable
    let response = create_router(h.state.clone())
        .oneshot(trigger("noop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let mut scheduler = JobScheduler::new(h.state.signals.clone());
    scheduler.register(Arc::new(NoopJob), JobConfig::default());
    let state = Arc::new(
        AppState::new(h.store.clone(), h.chain.clone(), h.state.signals.clone())
            .with_scheduler(Arc::new(scheduler)),
    );
    let router = create_router(state);

    let response = router.clone().oneshot(trigger("noop")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["job"], "noop");
    assert_eq!(body["result"], "completed");

    let response = router.oneshot(trigger("missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness();
    let router = create_router(h.state.clone());

    let response = router.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.chain.set_healthy(false);
    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "degraded");
    let response = router.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.store.set_healthy(false);
    let response = router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_rate_limit_applies_to_api_routes_only() {
    let h = harness();
    let router = create_router_with_rate_limit(
        h.state,
        RateLimitConfig {
            requests_per_second: NonZeroU32::MIN,
            burst_size: NonZeroU32::MIN,
        },
    );

    let first = router.clone().oneshot(get("/interactions/stats")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.clone().oneshot(get("/interactions/stats")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    let body = body_json(second).await;
    assert_eq!(body["error"]["type"], "rate_limited");

    let health = router.oneshot(get("/health/live")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}
