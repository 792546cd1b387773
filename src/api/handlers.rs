use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::idempotent::{guarded, outcome_of};
use crate::api::requests::{
    OrderRequest, PaymentRequest, RefundRequest, SubscribeRequest, VoucherRedeemRequest,
};
use crate::api::responses::{
    ErrorResponse, HealthResponse, OrderResponse, PaymentResponse, RefundResponse,
    VoucherRedeemResponse,
};
use crate::error::AppError;
use crate::idempotency::{KeySource, MetricsSnapshot, Outcome};

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.health_checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(HealthResponse::from(health)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus exposition endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}

pub async fn idempotency_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.coordinator.metrics().snapshot())
}

fn validation_failed(errors: Vec<crate::api::requests::ValidationError>) -> Response {
    ErrorResponse::validation(errors).into_response_with(StatusCode::BAD_REQUEST)
}

// ============================================================================
// Payment Handlers
// ============================================================================

async fn process_payment(request: PaymentRequest, delay: Duration) -> Result<Outcome, AppError> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let response = PaymentResponse {
        transaction_id: format!("TXN-{}", Uuid::new_v4()),
        amount: request.amount,
        currency: request.currency,
        status: "COMPLETED".to_string(),
        processed_at: Utc::now(),
    };
    tracing::info!(
        transaction_id = %response.transaction_id,
        amount = %response.amount,
        "Payment processed"
    );

    outcome_of(StatusCode::OK, &response)
}

/// Take a payment.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    guarded(
        &state,
        &state.policies.payments,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || process_payment(request, Duration::ZERO),
    )
    .await
}

/// Take a payment through a deliberately slow processor.
pub async fn create_slow_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    let delay = Duration::from_millis(state.settings.application.slow_operation_ms);
    guarded(
        &state,
        &state.policies.slow_payments,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || process_payment(request, delay),
    )
    .await
}

/// Refund a payment.
pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RefundRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    guarded(
        &state,
        &state.policies.refunds,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || async move {
            let response = RefundResponse {
                refund_id: format!("RFD-{}", Uuid::new_v4()),
                transaction_id: request.transaction_id,
                amount: request.amount,
                status: "REFUNDED".to_string(),
                refunded_at: Utc::now(),
            };
            tracing::info!(refund_id = %response.refund_id, "Refund issued");
            outcome_of(StatusCode::CREATED, &response)
        },
    )
    .await
}

// ============================================================================
// Order Handlers
// ============================================================================

/// Place an order.
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OrderRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    guarded(
        &state,
        &state.policies.orders,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || async move {
            let response = OrderResponse {
                order_id: format!("ORD-{}", Uuid::new_v4()),
                total: request.total(),
                item_count: request.items.len(),
                status: "CREATED".to_string(),
                created_at: Utc::now(),
            };
            tracing::info!(order_id = %response.order_id, total = %response.total, "Order created");
            outcome_of(StatusCode::CREATED, &response)
        },
    )
    .await
}

/// Cancel an order. Answers 204 with no body, replays included.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    guarded(
        &state,
        &state.policies.order_cancellations,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || async move {
            tracing::info!(order_id = %order_id, "Order cancelled");
            Ok(Outcome::empty(StatusCode::NO_CONTENT.as_u16()))
        },
    )
    .await
}

// ============================================================================
// Subscription and Voucher Handlers
// ============================================================================

/// Subscribe to the newsletter. Repeats are refused rather than replayed.
pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    guarded(
        &state,
        &state.policies.subscriptions,
        state.header_extractor.as_ref(),
        KeySource::new(&headers),
        move || async move {
            tracing::info!(email = %crate::observability::mask_sensitive(&request.email, 3), "Subscription created");
            Ok(Outcome::empty(StatusCode::OK.as_u16()))
        },
    )
    .await
}

/// Redeem a voucher, keyed by header or by voucher and user.
pub async fn redeem_voucher(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VoucherRedeemRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return validation_failed(errors);
    }

    let body = match serde_json::to_value(&request) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize voucher request");
            return ErrorResponse::internal().into_response_with(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    guarded(
        &state,
        &state.policies.vouchers,
        state.voucher_extractor.as_ref(),
        KeySource::new(&headers).with_body(&body),
        move || async move {
            let response = VoucherRedeemResponse {
                redemption_id: format!("RDM-{}", Uuid::new_v4()),
                voucher_code: request.voucher_code,
                user_id: request.user_id,
                redeemed_at: Utc::now(),
            };
            tracing::info!(redemption_id = %response.redemption_id, "Voucher redeemed");
            outcome_of(StatusCode::CREATED, &response)
        },
    )
    .await
}
