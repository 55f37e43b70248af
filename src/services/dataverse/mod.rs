//! Dataverse service layer.
//!
//! Everything that talks to the upstream repository lives here:
//! - Collection fan-out search, merging per-collection result sets into
//!   one deduplicated envelope
//! - Versioned dataset lookups with the draft-to-latest fallback
//! - The datafile fetch path that caches image payloads
//!
//! Cache keys for both search and file payloads are also defined here so
//! the request handlers and the background revalidation share one notion
//! of identity.

pub mod api;

use crate::cache::{CachedPayload, TtlCache};
use crate::config::Config;
use crate::error::ProxyError;
use self::api::DataverseApi;
use axum::body::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use tracing::{debug, warn};

/// Page size sent upstream when fanning out over collections. Merging
/// truncated per-collection pages would silently drop items, so this is
/// much larger than the unscoped default.
const SCOPED_PER_PAGE: u32 = 1000;
/// Page size assumed by the cache key when the caller does not set one.
const KEY_DEFAULT_PER_PAGE: u32 = 50;

/// Query parameters accepted by the search endpoint and passed through to
/// the upstream search API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub subtree: Option<String>,
    pub start: Option<u32>,
    pub per_page: Option<u32>,
    pub show_facets: Option<bool>,
    pub fq: Option<String>,
    pub metadata_fields: Option<String>,
}

impl SearchParams {
    /// The query string, defaulting to the match-all query.
    pub fn query(&self) -> &str {
        self.q.as_deref().unwrap_or("*")
    }
}

/// Deterministic cache key for a search request: a namespace prefix plus
/// the sorted-key JSON encoding of every parameter that affects the
/// result. Unset optional parameters are omitted so requests differing
/// only in an absent field share an entry.
pub fn search_cache_key(params: &SearchParams) -> String {
    let mut normalized = BTreeMap::new();
    normalized.insert("q", json!(params.query()));
    normalized.insert("start", json!(params.start.unwrap_or(0)));
    normalized.insert(
        "per_page",
        json!(params.per_page.unwrap_or(KEY_DEFAULT_PER_PAGE)),
    );
    if let Some(item_type) = &params.item_type {
        normalized.insert("type", json!(item_type));
    }
    if let Some(subtree) = &params.subtree {
        normalized.insert("subtree", json!(subtree));
    }
    if let Some(fq) = &params.fq {
        normalized.insert("fq", json!(fq));
    }
    if let Some(fields) = &params.metadata_fields {
        normalized.insert("metadata_fields", json!(fields));
    }
    if let Some(show_facets) = params.show_facets {
        normalized.insert("show_facets", json!(show_facets));
    }

    let encoded = serde_json::to_string(&normalized).expect("sorted map of JSON scalars");
    format!("search:{encoded}")
}

/// Cache key for a datafile access request.
pub fn file_cache_key(file_id: &str, thumb: bool) -> String {
    format!("file:{}-{}", file_id, if thumb { "thumb" } else { "full" })
}

/// Identity used to deduplicate items merged across collections: the
/// persistent identifier when present, the internal id otherwise, and the
/// serialized item as a last resort so an identifier always exists.
fn item_identity(item: &Value) -> String {
    if let Some(global_id) = item.get("global_id").and_then(Value::as_str) {
        if !global_id.is_empty() {
            return global_id.to_string();
        }
    }
    if let Some(id) = item.get("id") {
        if !id.is_null() {
            return id.to_string();
        }
    }
    item.to_string()
}

/// Build the upstream query for one search call. `subtree` is the
/// effective scope: a forced collection alias in scoped mode, the caller's
/// own value in unscoped mode.
fn upstream_search_query(
    params: &SearchParams,
    subtree: Option<&str>,
    per_page: Option<u32>,
    show_hidden: bool,
) -> Vec<(&'static str, String)> {
    let mut query = vec![("q", params.query().to_string())];
    if let Some(item_type) = &params.item_type {
        query.push(("type", item_type.clone()));
    }
    if let Some(start) = params.start {
        query.push(("start", start.to_string()));
    }
    if let Some(per_page) = per_page {
        query.push(("per_page", per_page.to_string()));
    }
    if let Some(subtree) = subtree {
        query.push(("subtree", subtree.to_string()));
    }
    if params.show_facets == Some(true) {
        query.push(("show_facets", "true".to_string()));
    }
    if let Some(fq) = &params.fq {
        query.push(("fq", fq.clone()));
    }
    if let Some(fields) = &params.metadata_fields {
        query.push(("metadata_fields", fields.clone()));
    }
    if show_hidden {
        query.push(("show_hidden", "true".to_string()));
    }
    query
}

/// Issue the caller's search against every configured collection in
/// order, merging the results into one deduplicated envelope. Items keep
/// first-seen order, so on duplicate identity the earlier collection
/// wins. A failing collection contributes nothing; the others still
/// answer, and the counts are recomputed from the merged list rather
/// than summed from upstream.
async fn fan_out_search<F, Fut>(collections: &[String], start: u32, fetch: F) -> Value
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Value, ProxyError>>,
{
    let mut items: Vec<Value> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for collection in collections {
        match fetch(collection.clone()).await {
            Ok(body) => {
                let returned = body
                    .pointer("/data/items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                debug!(
                    collection = %collection,
                    items = returned.len(),
                    "Collection search returned"
                );
                for item in returned {
                    if seen.insert(item_identity(&item)) {
                        items.push(item);
                    }
                }
            }
            Err(e) => {
                warn!(
                    collection = %collection,
                    error = %e,
                    "Collection search failed, contributing no items"
                );
            }
        }
    }

    let count = items.len();
    json!({
        "status": "OK",
        "data": {
            "items": items,
            "total_count": count,
            "start": start,
            "count_in_response": count,
        }
    })
}

/// Run a search and cache the successful result under `cache_key`.
///
/// With collections configured the caller's `subtree` is ignored and every
/// configured alias is queried instead; the frontend cannot widen the
/// collection set. Without collections the single upstream call passes the
/// caller's parameters through and its envelope is returned unmodified.
pub async fn perform_search(
    api: &DataverseApi,
    config: &Config,
    cache: &TtlCache,
    params: &SearchParams,
    cache_key: &str,
) -> Result<Value, ProxyError> {
    let show_hidden = config.show_hidden_active();
    let collections = &config.dataverse.collections;

    let data = if collections.is_empty() {
        let query =
            upstream_search_query(params, params.subtree.as_deref(), params.per_page, show_hidden);
        api.get_json("search", "/search", &query).await?
    } else {
        let per_page = Some(params.per_page.unwrap_or(SCOPED_PER_PAGE));
        fan_out_search(collections, params.start.unwrap_or(0), |collection| {
            let query = upstream_search_query(params, Some(&collection), per_page, show_hidden);
            async move { api.get_json("search", "/search", &query).await }
        })
        .await
    };

    cache
        .put(cache_key, CachedPayload::Json(data.clone()))
        .await;
    Ok(data)
}

/// Apply the draft-first policy around a versioned fetch. With hidden
/// content active the `:draft` version is tried first, falling back to
/// `:latest` only when the upstream reports the draft missing; any other
/// error propagates untouched. Otherwise `:latest` is fetched directly.
async fn with_draft_fallback<F, Fut>(show_hidden: bool, fetch: F) -> Result<Value, ProxyError>
where
    F: Fn(&'static str) -> Fut,
    Fut: Future<Output = Result<Value, ProxyError>>,
{
    if !show_hidden {
        return fetch(":latest").await;
    }

    match fetch(":draft").await {
        Err(e) if e.is_not_found() => {
            debug!("Draft version not found, falling back to latest");
            fetch(":latest").await
        }
        other => other,
    }
}

/// Fetch one dataset version by persistent identifier.
pub async fn fetch_dataset_version(
    api: &DataverseApi,
    show_hidden: bool,
    persistent_id: &str,
) -> Result<Value, ProxyError> {
    with_draft_fallback(show_hidden, |version| {
        let path = format!("/datasets/:persistentId/versions/{version}");
        let params = vec![("persistentId", persistent_id.to_string())];
        async move { api.get_json("datasets", &path, &params).await }
    })
    .await
}

/// List the files of one dataset version, addressed either by the literal
/// `:persistentId` path segment plus query parameter or by numeric id.
pub async fn fetch_dataset_files(
    api: &DataverseApi,
    show_hidden: bool,
    id_or_pid: &str,
    persistent_id: Option<&str>,
) -> Result<Value, ProxyError> {
    let is_pid = id_or_pid == ":persistentId";

    with_draft_fallback(show_hidden, |version| {
        let path = if is_pid {
            format!("/datasets/:persistentId/versions/{version}/files")
        } else {
            format!("/datasets/{id_or_pid}/versions/{version}/files")
        };
        let params: Vec<(&str, String)> = match (is_pid, persistent_id) {
            (true, Some(pid)) => vec![("persistentId", pid.to_string())],
            _ => Vec::new(),
        };
        async move { api.get_json("datasets", &path, &params).await }
    })
    .await
}

/// Fetch a datafile's bytes and cache them when the upstream reports an
/// image content type. Only the thumbnail path calls this; full downloads
/// stream elsewhere and never touch the cache.
pub async fn fetch_and_cache_file(
    api: &DataverseApi,
    cache: &TtlCache,
    file_id: &str,
    thumb: bool,
    cache_key: &str,
) -> Result<(Bytes, String), ProxyError> {
    let params: Vec<(&str, String)> = if thumb {
        vec![("imageThumb", "true".to_string())]
    } else {
        Vec::new()
    };

    let (bytes, content_type) = api
        .get_bytes("access", &format!("/access/datafile/{file_id}"), &params)
        .await?;

    if content_type.starts_with("image/") {
        cache
            .put(
                cache_key,
                CachedPayload::Binary {
                    bytes: bytes.clone(),
                    content_type: content_type.clone(),
                },
            )
            .await;
        debug!(
            file_id = %file_id,
            content_type = %content_type,
            "Cached image payload"
        );
    }

    Ok((bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn envelope(items: Vec<Value>) -> Value {
        let count = items.len();
        json!({
            "status": "OK",
            "data": {
                "items": items,
                "total_count": count,
                "start": 0,
                "count_in_response": count,
            }
        })
    }

    fn upstream_error(status: u16) -> ProxyError {
        ProxyError::UpstreamStatus { status, body: None }
    }

    #[tokio::test]
    async fn fan_out_deduplicates_by_global_id() {
        let collections = vec!["alpha".to_string(), "beta".to_string()];

        let merged = fan_out_search(&collections, 0, |collection| async move {
            Ok(envelope(vec![
                json!({"global_id": "doi:10.5072/X", "origin": collection}),
            ]))
        })
        .await;

        let items = merged.pointer("/data/items").unwrap().as_array().unwrap();
        assert_eq!(items.len(), 1);
        // First collection in configuration order wins on duplicate identity
        assert_eq!(items[0]["origin"], "alpha");
        assert_eq!(merged.pointer("/data/total_count").unwrap(), 1);
        assert_eq!(merged.pointer("/data/count_in_response").unwrap(), 1);
    }

    #[tokio::test]
    async fn fan_out_queries_collections_in_configuration_order() {
        let collections = vec!["alpha".to_string(), "beta".to_string()];
        let queried = Mutex::new(Vec::new());

        fan_out_search(&collections, 0, |collection| {
            queried.lock().unwrap().push(collection);
            async { Ok(envelope(vec![])) }
        })
        .await;

        assert_eq!(*queried.lock().unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn fan_out_tolerates_a_failing_collection() {
        let collections = vec!["alpha".to_string(), "beta".to_string()];

        let merged = fan_out_search(&collections, 0, |collection| async move {
            if collection == "beta" {
                return Err(upstream_error(500));
            }
            Ok(envelope(vec![
                json!({"global_id": "doi:1"}),
                json!({"global_id": "doi:2"}),
                json!({"global_id": "doi:3"}),
            ]))
        })
        .await;

        let items = merged.pointer("/data/items").unwrap().as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(merged.pointer("/data/total_count").unwrap(), 3);
        assert_eq!(merged["status"], "OK");
    }

    #[tokio::test]
    async fn fan_out_counts_come_from_the_merged_list() {
        let collections = vec!["alpha".to_string(), "beta".to_string()];

        // Each collection reports total_count 2, but one item is shared
        let merged = fan_out_search(&collections, 0, |collection| async move {
            let items = if collection == "alpha" {
                vec![json!({"global_id": "doi:A"}), json!({"global_id": "doi:B"})]
            } else {
                vec![json!({"global_id": "doi:B"}), json!({"global_id": "doi:C"})]
            };
            Ok(envelope(items))
        })
        .await;

        assert_eq!(merged.pointer("/data/total_count").unwrap(), 3);
        assert_eq!(merged.pointer("/data/count_in_response").unwrap(), 3);
    }

    #[test]
    fn identity_prefers_global_id_then_id_then_serialization() {
        let with_gid = json!({"global_id": "doi:10.5072/X", "id": 7});
        assert_eq!(item_identity(&with_gid), "doi:10.5072/X");

        // An empty global_id is treated as missing
        let empty_gid = json!({"global_id": "", "id": 7});
        assert_eq!(item_identity(&empty_gid), "7");

        let with_id = json!({"id": 42, "name": "x"});
        assert_eq!(item_identity(&with_id), "42");

        let bare = json!({"name": "x"});
        assert_eq!(item_identity(&bare), bare.to_string());
    }

    #[test]
    fn scoped_query_overrides_caller_subtree() {
        let params = SearchParams {
            subtree: Some("gamma".to_string()),
            ..Default::default()
        };

        let query = upstream_search_query(&params, Some("alpha"), Some(SCOPED_PER_PAGE), false);
        let subtree = query.iter().find(|(k, _)| *k == "subtree").unwrap();
        assert_eq!(subtree.1, "alpha");
        assert!(!query.iter().any(|(_, v)| v == "gamma"));

        let per_page = query.iter().find(|(k, _)| *k == "per_page").unwrap();
        assert_eq!(per_page.1, "1000");
    }

    #[test]
    fn unscoped_query_passes_subtree_through() {
        let params = SearchParams {
            subtree: Some("gamma".to_string()),
            per_page: Some(25),
            ..Default::default()
        };

        let query =
            upstream_search_query(&params, params.subtree.as_deref(), params.per_page, true);
        assert!(query.contains(&("subtree", "gamma".to_string())));
        assert!(query.contains(&("per_page", "25".to_string())));
        assert!(query.contains(&("show_hidden", "true".to_string())));
    }

    #[test]
    fn cache_key_includes_filter_parameters() {
        let base = SearchParams {
            q: Some("coral".to_string()),
            ..Default::default()
        };
        let filtered = SearchParams {
            q: Some("coral".to_string()),
            fq: Some("publication_date:2024".to_string()),
            ..Default::default()
        };

        assert_ne!(search_cache_key(&base), search_cache_key(&filtered));
        assert!(search_cache_key(&filtered).contains("publication_date:2024"));
    }

    #[test]
    fn cache_key_is_stable_across_defaults() {
        let implicit = SearchParams::default();
        let explicit = SearchParams {
            q: Some("*".to_string()),
            start: Some(0),
            per_page: Some(50),
            ..Default::default()
        };

        assert_eq!(search_cache_key(&implicit), search_cache_key(&explicit));
        assert!(search_cache_key(&implicit).starts_with("search:"));
    }

    #[test]
    fn file_keys_distinguish_variants() {
        assert_eq!(file_cache_key("12", true), "file:12-thumb");
        assert_eq!(file_cache_key("12", false), "file:12-full");
    }

    #[tokio::test]
    async fn draft_fallback_recovers_from_missing_draft() {
        let calls = Mutex::new(Vec::new());

        let result = with_draft_fallback(true, |version| {
            calls.lock().unwrap().push(version);
            let outcome = if version == ":draft" {
                Err(upstream_error(404))
            } else {
                Ok(json!({"version": "latest"}))
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap()["version"], "latest");
        assert_eq!(*calls.lock().unwrap(), vec![":draft", ":latest"]);
    }

    #[tokio::test]
    async fn draft_fallback_surfaces_other_errors() {
        let calls = Mutex::new(Vec::new());

        let result = with_draft_fallback(true, |version| {
            calls.lock().unwrap().push(version);
            async { Err::<Value, _>(upstream_error(500)) }
        })
        .await;

        assert!(matches!(
            result,
            Err(ProxyError::UpstreamStatus { status: 500, .. })
        ));
        // The 500 is not retried against :latest
        assert_eq!(*calls.lock().unwrap(), vec![":draft"]);
    }

    #[tokio::test]
    async fn draft_is_not_tried_when_hidden_content_is_off() {
        let calls = Mutex::new(Vec::new());

        with_draft_fallback(false, |version| {
            calls.lock().unwrap().push(version);
            async { Ok(json!({})) }
        })
        .await
        .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![":latest"]);
    }
}
