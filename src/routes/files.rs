//! File metadata and datafile access endpoints.
//!
//! Thumbnails go through the stale-while-revalidate cache; full downloads
//! always stream straight from the upstream so arbitrarily large media is
//! never buffered in process memory.

use crate::cache::{CachedPayload, Freshness};
use crate::error::ProxyError;
use crate::services::dataverse::{fetch_and_cache_file, file_cache_key};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{HIT_FRESH, HIT_STALE, MISS, X_CACHE};

/// `GET /api/files/{fileId}` — metadata pass-through, no caching.
pub async fn file_metadata(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let body = state
        .api
        .get_json("files", &format!("/files/{file_id}"), &[])
        .await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct DatafileQuery {
    #[serde(rename = "imageThumb")]
    pub image_thumb: Option<bool>,
}

/// `GET /api/access/datafile/{fileId}`
///
/// Failures render a generic 500 body regardless of the upstream status:
/// these responses usually land in `<img>` or download handlers, not in
/// error-aware client code.
pub async fn datafile(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<DatafileQuery>,
) -> Response {
    let thumb = query.image_thumb.unwrap_or(false);

    let result = if thumb {
        thumbnail(&state, &file_id).await
    } else {
        stream_full(&state, &file_id).await
    };

    result.unwrap_or_else(|e| {
        error!(file_id = %file_id, error = %e, "Datafile request failed");
        ProxyError::Download.into_response()
    })
}

/// Thumbnail path: cache-eligible, with the same stale-while-revalidate
/// protocol as search.
async fn thumbnail(state: &AppState, file_id: &str) -> Result<Response, ProxyError> {
    let key = file_cache_key(file_id, true);

    if let Some((
        CachedPayload::Binary {
            bytes,
            content_type,
        },
        freshness,
    )) = state.cache.lookup(&key).await
    {
        let label = match freshness {
            Freshness::Fresh => {
                state.metrics.record_lookup("fresh");
                HIT_FRESH
            }
            Freshness::Stale => {
                state.metrics.record_lookup("stale");
                if state.revalidations.try_begin(&key).await {
                    spawn_thumbnail_revalidation(state.clone(), file_id.to_string(), key.clone());
                }
                HIT_STALE
            }
        };
        debug!(file_id = %file_id, x_cache = label, "Thumbnail served from cache");
        return Ok((
            [
                (header::CONTENT_TYPE, content_type),
                (X_CACHE, label.to_string()),
            ],
            bytes,
        )
            .into_response());
    }

    debug!(file_id = %file_id, "Thumbnail cache MISS, fetching from upstream");
    state.metrics.record_lookup("miss");
    let (bytes, content_type) = fetch_and_cache_file(&state.api, &state.cache, file_id, true, &key).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (X_CACHE, MISS.to_string()),
        ],
        bytes,
    )
        .into_response())
}

fn spawn_thumbnail_revalidation(state: AppState, file_id: String, key: String) {
    tokio::spawn(async move {
        match fetch_and_cache_file(&state.api, &state.cache, &file_id, true, &key).await {
            Ok(_) => state.metrics.record_revalidation("success"),
            Err(e) => {
                state.metrics.record_revalidation("failure");
                warn!(file_id = %file_id, error = %e, "Background thumbnail revalidation failed");
            }
        }
        state.revalidations.end(&key).await;
    });
}

/// Full-download path: body streamed through with content headers
/// forwarded, never cached.
async fn stream_full(state: &AppState, file_id: &str) -> Result<Response, ProxyError> {
    let resp = state
        .api
        .get_stream("access", &format!("/access/datafile/{file_id}"), &[])
        .await?;

    let mut headers = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::CONTENT_DISPOSITION] {
        if let Some(value) = resp
            .headers()
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(name, value);
        }
    }

    debug!(file_id = %file_id, "Streaming datafile through uncached");
    Ok((headers, Body::from_stream(resp.bytes_stream())).into_response())
}
