use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::requests::ValidationError;
use crate::observability::{AggregatedHealth, DependencyHealth, HealthStatus};

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", "Idempotency key is required").with_detail(detail)
    }

    pub fn duplicate_in_progress(detail: impl Into<String>) -> Self {
        Self::new(
            "DUPLICATE_REQUEST",
            "A request with this idempotency key is being processed, please retry later",
        )
        .with_detail(detail)
    }

    pub fn already_processed(detail: impl Into<String>) -> Self {
        Self::new("DUPLICATE_REQUEST", "This request has already been processed").with_detail(detail)
    }

    pub fn validation(errors: Vec<ValidationError>) -> Self {
        let details = errors
            .into_iter()
            .map(|e| ValidationErrorDetail {
                field: e.field,
                message: e.message,
            })
            .collect();
        Self::new("VALIDATION_ERROR", "Request validation failed").with_details(details)
    }

    pub fn store_unavailable() -> Self {
        Self::new(
            "STORE_UNAVAILABLE",
            "Idempotency store is unavailable, request was not processed",
        )
    }

    pub fn internal() -> Self {
        Self::new("INTERNAL_ERROR", "An internal error occurred")
    }

    /// Pairs the body with its HTTP status.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub status: String,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub total: Decimal,
    pub item_count: usize,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherRedeemResponse {
    pub redemption_id: String,
    pub voucher_code: String,
    pub user_id: String,
    pub redeemed_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
    pub dependencies: Vec<DependencyHealth>,
}

impl From<AggregatedHealth> for HealthResponse {
    fn from(health: AggregatedHealth) -> Self {
        Self {
            status: health.status,
            version: health.version,
            uptime_seconds: health.uptime_seconds,
            timestamp: Utc::now(),
            dependencies: health.dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse::duplicate_in_progress("abcd****")).unwrap();
        assert_eq!(body["code"], "DUPLICATE_REQUEST");
        assert_eq!(body["detail"], "abcd****");
        assert!(body.get("timestamp").is_some());
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_validation_details() {
        let response = ErrorResponse::validation(vec![ValidationError {
            field: "amount".to_string(),
            message: "amount must be positive".to_string(),
        }]);
        assert_eq!(response.code, "VALIDATION_ERROR");
        assert_eq!(response.details.unwrap()[0].field, "amount");
    }
}
