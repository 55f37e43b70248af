//! Dataset version and file-listing endpoints.
//!
//! Both apply the draft-to-latest fallback: the requested version in the
//! path is superseded by the server's hidden-content policy.

use crate::error::ProxyError;
use crate::services::dataverse::{fetch_dataset_files, fetch_dataset_version};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct PersistentIdQuery {
    #[serde(rename = "persistentId")]
    pub persistent_id: Option<String>,
}

/// `GET /api/datasets/{persistentId}/versions/{version}`
pub async fn dataset_version(
    State(state): State<AppState>,
    Path((_persistent_id, _version)): Path<(String, String)>,
    Query(query): Query<PersistentIdQuery>,
) -> Result<Json<Value>, ProxyError> {
    let persistent_id = query.persistent_id.unwrap_or_default();
    let body = fetch_dataset_version(
        &state.api,
        state.config.show_hidden_active(),
        &persistent_id,
    )
    .await?;
    Ok(Json(body))
}

/// `GET /api/datasets/{idOrPid}/versions/{version}/files`
pub async fn dataset_files(
    State(state): State<AppState>,
    Path((id_or_pid, _version)): Path<(String, String)>,
    Query(query): Query<PersistentIdQuery>,
) -> Result<Json<Value>, ProxyError> {
    let body = fetch_dataset_files(
        &state.api,
        state.config.show_hidden_active(),
        &id_or_pid,
        query.persistent_id.as_deref(),
    )
    .await?;
    Ok(Json(body))
}
