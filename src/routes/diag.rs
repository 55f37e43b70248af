//! Diagnostics endpoints.

use crate::cache::CacheStats;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;

/// `GET /api/cache/stats` — enumerate every cache entry with its age
/// classification. Debugging aid, not part of the client contract.
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}
