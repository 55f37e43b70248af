//! HTTP handlers for the proxy surface consumed by the UI.

pub mod datasets;
pub mod diag;
pub mod files;
pub mod search;

use axum::http::HeaderName;

/// Response header reporting how the cache answered a request.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub const HIT_FRESH: &str = "HIT-FRESH";
pub const HIT_STALE: &str = "HIT-STALE";
pub const MISS: &str = "MISS";
