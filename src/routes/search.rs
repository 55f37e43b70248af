//! Search endpoint with stale-while-revalidate semantics.

use crate::cache::{CachedPayload, Freshness};
use crate::error::ProxyError;
use crate::services::dataverse::{perform_search, search_cache_key, SearchParams};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::{HIT_FRESH, HIT_STALE, MISS, X_CACHE};

/// `GET /api/search`
///
/// Fresh cache answers immediately; stale cache answers immediately and
/// refreshes in the background; a miss fetches synchronously. The
/// `X-Cache` header tells the client which of the three happened.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ProxyError> {
    let key = search_cache_key(&params);

    if let Some((CachedPayload::Json(body), freshness)) = state.cache.lookup(&key).await {
        return Ok(match freshness {
            Freshness::Fresh => {
                debug!(cache_key = %key, "Search cache HIT (fresh)");
                state.metrics.record_lookup("fresh");
                ([(X_CACHE, HIT_FRESH)], Json(body)).into_response()
            }
            Freshness::Stale => {
                debug!(cache_key = %key, "Search cache HIT (stale), revalidating in background");
                state.metrics.record_lookup("stale");
                if state.revalidations.try_begin(&key).await {
                    spawn_revalidation(state.clone(), params.clone(), key.clone());
                }
                ([(X_CACHE, HIT_STALE)], Json(body)).into_response()
            }
        });
    }

    debug!(cache_key = %key, "Search cache MISS, fetching from upstream");
    state.metrics.record_lookup("miss");
    let body = perform_search(&state.api, &state.config, &state.cache, &params, &key).await?;
    Ok(([(X_CACHE, MISS)], Json(body)).into_response())
}

/// Run the refresh the caller already claimed through the tracker. The
/// claim is released when the fetch settles, whatever the outcome.
fn spawn_revalidation(state: AppState, params: SearchParams, key: String) {
    tokio::spawn(async move {
        match perform_search(&state.api, &state.config, &state.cache, &params, &key).await {
            Ok(_) => state.metrics.record_revalidation("success"),
            Err(e) => {
                state.metrics.record_revalidation("failure");
                warn!(cache_key = %key, error = %e, "Background search revalidation failed");
            }
        }
        state.revalidations.end(&key).await;
    });
}
