//! Glue between axum handlers and the idempotency coordinator.

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::future::Future;

use crate::api::responses::ErrorResponse;
use crate::error::AppError;
use crate::idempotency::{
    ExecuteError, IdempotencyPolicy, KeyExtractor, KeySource, Outcome, ResultCodec,
};

use super::routes::AppState;

/// True when the replay header is present and reads `true`.
pub fn bypass_requested(headers: &HeaderMap, header_name: &str) -> bool {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Serializes a handler result into a cacheable outcome.
pub fn outcome_of<T: Serialize>(status: StatusCode, body: &T) -> Result<Outcome, AppError> {
    ResultCodec::new().encode(status.as_u16(), body)
}

/// Runs `operation` under `policy` and maps the result to an HTTP response.
pub async fn guarded<F, Fut>(
    state: &AppState,
    policy: &IdempotencyPolicy,
    extractor: &dyn KeyExtractor,
    source: KeySource<'_>,
    operation: F,
) -> Response
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Outcome, AppError>> + Send + 'static,
{
    let bypass = bypass_requested(source.headers, &state.settings.idempotency.replay_header);

    match state
        .coordinator
        .execute(policy, extractor, &source, bypass, operation)
        .await
    {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => execute_error_response(e),
    }
}

/// Renders a fresh or replayed outcome with its original status.
pub fn outcome_response(outcome: Outcome) -> Response {
    let status = StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::OK);

    if outcome.has_body() {
        (status, Json(outcome.payload)).into_response()
    } else {
        (status, Body::empty()).into_response()
    }
}

pub fn execute_error_response(error: ExecuteError<AppError>) -> Response {
    match error {
        ExecuteError::MissingKey(missing) => {
            ErrorResponse::invalid_request(missing.0).into_response_with(StatusCode::BAD_REQUEST)
        }
        ExecuteError::DuplicateInProgress { key } => {
            ErrorResponse::duplicate_in_progress(key).into_response_with(StatusCode::CONFLICT)
        }
        ExecuteError::AlreadyProcessed { key } => {
            ErrorResponse::already_processed(key).into_response_with(StatusCode::CONFLICT)
        }
        ExecuteError::Store(e) => {
            tracing::error!(error = %e, "Guarded request refused, record store unavailable");
            ErrorResponse::store_unavailable().into_response_with(StatusCode::SERVICE_UNAVAILABLE)
        }
        ExecuteError::Aborted(reason) => {
            tracing::error!(reason = %reason, "Guarded operation aborted");
            ErrorResponse::internal().into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        }
        ExecuteError::Operation(AppError::Validation(msg)) => {
            ErrorResponse::new("VALIDATION_ERROR", msg).into_response_with(StatusCode::BAD_REQUEST)
        }
        ExecuteError::Operation(e) => {
            tracing::error!(error = %e, "Guarded operation failed");
            ErrorResponse::internal().into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::MissingKey;
    use axum::http::HeaderValue;

    #[test]
    fn test_bypass_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(!bypass_requested(&headers, "Idempotent-Replay"));

        headers.insert("idempotent-replay", HeaderValue::from_static("TRUE"));
        assert!(bypass_requested(&headers, "Idempotent-Replay"));

        headers.insert("idempotent-replay", HeaderValue::from_static("yes"));
        assert!(!bypass_requested(&headers, "Idempotent-Replay"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases: Vec<(ExecuteError<AppError>, StatusCode)> = vec![
            (ExecuteError::MissingKey(MissingKey("absent".into())), StatusCode::BAD_REQUEST),
            (ExecuteError::DuplicateInProgress { key: "k".into() }, StatusCode::CONFLICT),
            (ExecuteError::AlreadyProcessed { key: "k".into() }, StatusCode::CONFLICT),
            (
                ExecuteError::Store(AppError::StoreUnavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ExecuteError::Aborted("panic".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ExecuteError::Operation(AppError::Internal(anyhow::anyhow!("boom"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(execute_error_response(error).status(), expected);
        }
    }

    #[test]
    fn test_empty_outcome_has_no_body_and_keeps_status() {
        let response = outcome_response(Outcome::empty(204));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = outcome_response(Outcome::new(201, serde_json::json!({"id": 1})));
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
