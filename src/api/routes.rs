use axum::{
    extract::{MatchedPath, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Settings;
use crate::idempotency::{
    BodyFieldsKeyExtractor, FirstOfKeyExtractor, HeaderKeyExtractor, IdempotencyCoordinator,
    IdempotencyPolicy, KeyNormalizer, RecordStore, RepeatPolicy,
};
use crate::observability::{get_metrics, HealthChecker};

/// Policies of the guarded demo operations, resolved from settings once.
#[derive(Debug, Clone)]
pub struct DemoPolicies {
    pub payments: IdempotencyPolicy,
    pub slow_payments: IdempotencyPolicy,
    pub refunds: IdempotencyPolicy,
    pub orders: IdempotencyPolicy,
    pub order_cancellations: IdempotencyPolicy,
    pub subscriptions: IdempotencyPolicy,
    pub vouchers: IdempotencyPolicy,
}

impl DemoPolicies {
    pub fn from_settings(settings: &Settings) -> Self {
        let idem = &settings.idempotency;
        Self {
            payments: idem.policy_for("payments", RepeatPolicy::ReturnCached),
            slow_payments: idem.policy_for("payments_slow", RepeatPolicy::ReturnCached),
            refunds: idem.policy_for("refunds", RepeatPolicy::ReturnCached),
            orders: idem.policy_for("orders", RepeatPolicy::ReturnCached),
            order_cancellations: idem.policy_for("order_cancellations", RepeatPolicy::ReturnCached),
            subscriptions: idem.policy_for("subscriptions", RepeatPolicy::Reject),
            vouchers: idem.policy_for("vouchers", RepeatPolicy::ReturnCached),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IdempotencyCoordinator>,
    pub settings: Arc<Settings>,
    pub policies: Arc<DemoPolicies>,
    pub header_extractor: Arc<HeaderKeyExtractor>,
    /// Explicit key header first, then `{voucherCode}_{userId}`.
    pub voucher_extractor: Arc<FirstOfKeyExtractor>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, settings: Settings) -> Self {
        let normalizer = KeyNormalizer::new(settings.idempotency.key_prefix.clone());
        let coordinator = IdempotencyCoordinator::new(Arc::clone(&store), normalizer);
        let key_header = settings.idempotency.key_header.clone();

        let voucher_extractor = FirstOfKeyExtractor::new(vec![
            Box::new(HeaderKeyExtractor::new(key_header.clone())),
            Box::new(BodyFieldsKeyExtractor::new(["voucherCode", "userId"])),
        ]);

        Self {
            coordinator: Arc::new(coordinator),
            policies: Arc::new(DemoPolicies::from_settings(&settings)),
            header_extractor: Arc::new(HeaderKeyExtractor::new(key_header)),
            voucher_extractor: Arc::new(voucher_extractor),
            health_checker: Arc::new(HealthChecker::new(store)),
            settings: Arc::new(settings),
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Replaces the default health checker.
    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = checker;
        self
    }
}

/// Records `http_requests_total` per matched route.
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16());
    response
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/api/idempotency/stats", get(handlers::idempotency_stats))
        // Guarded demo endpoints
        .route("/api/demo/payments", post(handlers::create_payment))
        .route("/api/demo/payments/slow", post(handlers::create_slow_payment))
        .route("/api/demo/payments/refunds", post(handlers::create_refund))
        .route("/api/demo/orders", post(handlers::create_order))
        .route("/api/demo/orders/:id", delete(handlers::cancel_order))
        .route("/api/demo/subscriptions", post(handlers::subscribe))
        .route("/api/demo/vouchers/redeem", post(handlers::redeem_voucher))
        .route_layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
