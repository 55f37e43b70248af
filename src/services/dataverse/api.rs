use crate::error::ProxyError;
use crate::metrics::SharedMetrics;
use axum::body::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Header the upstream repository reads its API token from.
const API_KEY_HEADER: &str = "X-Dataverse-key";
/// Transport timeout applied uniformly to every upstream call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DataverseApi {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    metrics: SharedMetrics,
}

impl DataverseApi {
    /// `base_url` is the repository root; the `/api` prefix is appended here.
    pub fn new(base_url: &str, api_token: Option<String>, metrics: SharedMetrics) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: format!("{}/api", base_url.trim_end_matches('/')),
            api_token,
            metrics,
        }
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.api_token {
            req = req.header(API_KEY_HEADER, token);
        }
        req
    }

    /// Issue a single GET. Any non-2xx status becomes `UpstreamStatus` with
    /// the response body captured when it parses as JSON; network failures
    /// become `UpstreamUnavailable`. No retries: callers either degrade
    /// (fan-out search) or propagate.
    ///
    /// `endpoint` is a low-cardinality label for metrics, not the URL.
    async fn get(
        &self,
        endpoint: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ProxyError> {
        let start = Instant::now();
        debug!(path = %path, "Sending request to Dataverse API");

        let result = self.request(path).query(params).send().await;
        let elapsed = start.elapsed();

        match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    self.metrics
                        .record_upstream(endpoint, "success", elapsed.as_secs_f64());
                    debug!(
                        path = %path,
                        status = %status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Request successful"
                    );
                    Ok(resp)
                } else {
                    self.metrics
                        .record_upstream(endpoint, "error", elapsed.as_secs_f64());
                    debug!(
                        path = %path,
                        status = %status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Upstream returned error status"
                    );
                    let code = status.as_u16();
                    let body = resp.json::<Value>().await.ok();
                    Err(ProxyError::UpstreamStatus { status: code, body })
                }
            }
            Err(e) => {
                self.metrics
                    .record_upstream(endpoint, "error", elapsed.as_secs_f64());
                debug!(
                    path = %path,
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request failed"
                );
                Err(ProxyError::from(e))
            }
        }
    }

    /// GET returning the parsed JSON body.
    pub async fn get_json(
        &self,
        endpoint: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ProxyError> {
        let resp = self.get(endpoint, path, params).await?;
        Ok(resp.json().await?)
    }

    /// GET returning the raw body plus the reported content type.
    pub async fn get_bytes(
        &self,
        endpoint: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(Bytes, String), ProxyError> {
        let resp = self.get(endpoint, path, params).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await?;
        Ok((bytes, content_type))
    }

    /// GET returning the raw response so the caller can forward the body
    /// as a stream without buffering it.
    pub async fn get_stream(
        &self,
        endpoint: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ProxyError> {
        self.get(endpoint, path, params).await
    }
}
