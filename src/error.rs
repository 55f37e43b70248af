use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Upstream replied with a non-2xx status; the response body is kept
    /// when it parses as JSON so it can be relayed to the client.
    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16, body: Option<Value> },

    #[error("upstream request failed: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid upstream payload: {0}")]
    Parsing(String),

    /// Datafile download failure. Binary endpoints render this as a generic
    /// 500 body instead of relaying upstream detail.
    #[error("failed to download file")]
    Download,
}

impl ProxyError {
    /// True only for an upstream 404, which the dataset handlers recover
    /// from by falling back to the `:latest` version.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProxyError::UpstreamStatus { status: 404, .. })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProxyError::Parsing(err.to_string())
        } else {
            ProxyError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Parsing(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ProxyError::UpstreamStatus {
                body: Some(body), ..
            } => json!({ "error": body }),
            ProxyError::Download => json!({ "error": { "message": "Failed to download file" } }),
            other => json!({ "error": { "message": other.to_string() } }),
        };
        (status, Json(body)).into_response()
    }
}
