use crate::cache::{RevalidationTracker, TtlCache};
use crate::config::Config;
use crate::metrics::SharedMetrics;
use crate::services::dataverse::api::DataverseApi;
use std::sync::Arc;

/// Application state shared across handlers.
///
/// The cache store and revalidation tracker are the process-wide mutable
/// resources; everything else is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub api: DataverseApi,
    pub cache: TtlCache,
    pub revalidations: RevalidationTracker,
    pub metrics: SharedMetrics,
}
