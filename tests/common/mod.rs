#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use idempotency_guard::api::{create_router, AppState};
use idempotency_guard::config::Settings;
use idempotency_guard::error::AppError;
use idempotency_guard::idempotency::{IdempotencyCoordinator, InMemoryRecordStore, Outcome};

pub type OpFuture = Pin<Box<dyn Future<Output = Result<Outcome, AppError>> + Send>>;

pub fn memory_coordinator() -> (Arc<InMemoryRecordStore>, Arc<IdempotencyCoordinator>) {
    let store = Arc::new(InMemoryRecordStore::new());
    let coordinator = Arc::new(IdempotencyCoordinator::with_store(store.clone()));
    (store, coordinator)
}

/// An operation that counts its invocations and returns a fresh transaction id.
pub fn counted_op(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl FnOnce() -> OpFuture + Send + 'static {
    let calls = Arc::clone(calls);
    move || -> OpFuture {
        Box::pin(async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(Outcome::new(
                200,
                json!({"transactionId": Uuid::new_v4().to_string(), "attempt": attempt}),
            ))
        })
    }
}

pub fn failing_op(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> OpFuture + Send + 'static {
    let calls = Arc::clone(calls);
    move || -> OpFuture {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Internal(anyhow::anyhow!("payment gateway declined")))
        })
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.application.slow_operation_ms = 1000;
    settings
}

pub fn test_app() -> Router {
    let store = Arc::new(InMemoryRecordStore::new());
    create_router(AppState::new(store, test_settings()))
}

pub fn post_json(uri: &str, key: Option<&str>, bypass: bool, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotent-Key", key);
    }
    if bypass {
        builder = builder.header("Idempotent-Replay", "true");
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn delete(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    if let Some(key) = key {
        builder = builder.header("Idempotent-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Sends one request and returns the status and the JSON body (`Null` when empty).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

pub fn payment_body() -> Value {
    json!({"amount": 100.00, "currency": "USD"})
}

pub fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}
