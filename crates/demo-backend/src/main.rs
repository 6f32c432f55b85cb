use axum::extract::Path;
use axum::http::header::{ACCEPT_LANGUAGE, CACHE_CONTROL, ETAG, VARY};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Simulate upstream latency (5-20ms).
async fn upstream_delay() -> u64 {
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

/// Cacheable for 30s, with a strong validator.
async fn get_item(Path(id): Path<u64>) -> impl IntoResponse {
    let delay = upstream_delay().await;
    (
        [
            (CACHE_CONTROL, "public, max-age=30".to_string()),
            (ETAG, format!("\"item-{id}\"")),
        ],
        Json(json!({
            "id": id,
            "name": format!("Item {}", id),
            "data": "x".repeat(256),
            "latency_ms": delay,
        })),
    )
}

/// One variant per `Accept-Language`.
async fn greeting(headers: HeaderMap) -> impl IntoResponse {
    upstream_delay().await;
    let lang = headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("en");
    let text = if lang.starts_with("fr") {
        "bonjour"
    } else if lang.starts_with("de") {
        "hallo"
    } else {
        "hello"
    };
    (
        [
            (CACHE_CONTROL, "max-age=60"),
            (VARY, "Accept-Language"),
        ],
        text,
    )
}

/// Larger than the default split threshold, so the body is stored apart.
async fn report() -> impl IntoResponse {
    upstream_delay().await;
    ([(CACHE_CONTROL, "max-age=120")], "r".repeat(128 * 1024))
}

/// Never stored by a shared cache.
async fn account() -> impl IntoResponse {
    upstream_delay().await;
    (
        [(CACHE_CONTROL, "private, max-age=60")],
        Json(json!({ "user": "demo", "balance": 42 })),
    )
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = Router::new()
        .route("/api/items/{id}", get(get_item))
        .route("/api/greeting", get(greeting))
        .route("/api/report", get(report))
        .route("/api/account", get(account))
        .route("/health", get(health));

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo backend starting");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
