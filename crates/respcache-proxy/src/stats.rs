use crate::proxy::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use respcache::MemoryResponseCache;
use serde::Serialize;
use std::sync::Arc;

/// Store statistics served at `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreMetrics {
    pub policy: String,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl StoreMetrics {
    pub fn from_store(store: &MemoryResponseCache) -> Self {
        let stats = store.stats();
        let total = stats.hits + stats.misses;
        StoreMetrics {
            policy: store.policy_name().to_string(),
            hit_rate: if total > 0 {
                stats.hits as f64 / total as f64
            } else {
                0.0
            },
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            size: stats.current_size,
            capacity: stats.capacity,
        }
    }
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StoreMetrics::from_store(&state.store))
}
