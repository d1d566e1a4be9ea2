//! VPSie API client with timeout, retry, and SSRF hardening.
//!
//! # Responsibilities
//! - Fetch load balancer desired state
//! - Report lifecycle status, backend health, metrics, and events
//! - Bound every response read and surface truncated error bodies
//! - Keep connections reusable by draining bodies on every path

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Method, Response, StatusCode};
use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::api::guard;
use crate::models::LoadBalancer;

/// Response body cap; anything beyond this is silently discarded.
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// How much of a body to drain before dropping a response, enough to keep
/// the connection eligible for reuse without reading unbounded data.
const DRAIN_LIMIT: usize = 4096;

/// Error bodies surfaced in messages are clipped so upstream HTML error
/// pages or secrets cannot leak into logs.
const ERROR_BODY_LIMIT: usize = 200;

/// Hard deadline for one logical operation, retries included.
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

const MAX_RETRIES: u32 = 3;
const MAX_REDIRECTS: usize = 3;

/// Rejections raised while constructing the client. All are fatal at
/// startup; a base URL that fails the guard never produces a request.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("base URL must use HTTP or HTTPS scheme")]
    UnsupportedScheme,

    #[error("base URL must not be localhost or a private IP address")]
    ForbiddenHost,

    #[error("base URL domain not in allowed list: {0}")]
    DomainNotAllowed(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of a single API operation. None are recovered here beyond the
/// GET retry ladder; the reconciliation loop logs and skips its tick.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to execute request: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("request deadline exceeded")]
    Deadline,

    #[error("API returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the VPSie configuration service, scoped to one load balancer.
#[derive(Debug, Clone)]
pub struct VpsieClient {
    http: reqwest::Client,
    api_key: String,
    base_url: Url,
    loadbalancer_id: String,
}

impl VpsieClient {
    /// Create a client after validating the base URL against the scheme,
    /// SSRF, and domain-allowlist guards.
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        loadbalancer_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let url = Url::parse(base_url)?;
        Self::build(api_key.into(), url, loadbalancer_id.into(), true)
    }

    /// Test-only constructor that skips the host guard so tests can point
    /// the client at a local mock server.
    #[cfg(test)]
    pub(crate) fn new_for_tests(
        api_key: impl Into<String>,
        base_url: &str,
        loadbalancer_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let url = Url::parse(base_url)?;
        Self::build(api_key.into(), url, loadbalancer_id.into(), false)
    }

    fn build(
        api_key: String,
        base_url: Url,
        loadbalancer_id: String,
        enforce_host_guard: bool,
    ) -> Result<Self, ClientError> {
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::UnsupportedScheme);
        }
        if enforce_host_guard {
            if guard::is_private_or_localhost(&base_url) {
                return Err(ClientError::ForbiddenHost);
            }
            if !guard::is_allowed_domain(&base_url) {
                return Err(ClientError::DomainNotAllowed(
                    base_url.host_str().unwrap_or_default().to_string(),
                ));
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(redirect_policy())
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url,
            loadbalancer_id,
        })
    }

    /// Fetch the desired-state configuration for this load balancer.
    ///
    /// The only retried operation: up to three extra attempts on network
    /// errors and 5xx responses, backing off 1 s, 2 s, 4 s, all under the
    /// shared 10 s deadline.
    pub async fn fetch_config(&self) -> Result<LoadBalancer, ApiError> {
        let result = timeout(REQUEST_DEADLINE, self.fetch_config_inner())
            .await
            .map_err(|_| ApiError::Deadline)
            .and_then(|r| r);
        record_operation("fetch_config", result.is_ok());
        result
    }

    async fn fetch_config_inner(&self) -> Result<LoadBalancer, ApiError> {
        let url = self.loadbalancer_url("");

        let mut attempt: u32 = 0;
        let resp = loop {
            match self.send(Method::GET, &url, None).await {
                Ok(resp) if resp.status().as_u16() < 500 => break resp,
                Ok(resp) => {
                    if attempt >= MAX_RETRIES {
                        break resp;
                    }
                    // Finish with this body before the next attempt so the
                    // connection stays reusable.
                    drain(resp).await;
                }
                Err(err) => {
                    if attempt >= MAX_RETRIES {
                        return Err(ApiError::Unreachable(err));
                    }
                }
            }
            attempt += 1;
            sleep(Duration::from_secs(1u64 << (attempt - 1))).await;
        };

        if resp.status() != StatusCode::OK {
            return Err(status_error(resp).await);
        }

        let body = read_capped(resp, MAX_RESPONSE_SIZE).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Report the load balancer lifecycle status (e.g. "active").
    pub async fn report_status(&self, status: &str) -> Result<(), ApiError> {
        let url = self.loadbalancer_url("/status");
        let body = json!({ "status": status });
        let result = self
            .call(Method::PUT, url, Some(body), &[StatusCode::OK, StatusCode::NO_CONTENT])
            .await;
        record_operation("report_status", result.is_ok());
        result
    }

    /// Report one backend's observed health.
    pub async fn report_backend_health(
        &self,
        backend_id: &str,
        healthy: bool,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/backends/{}/health",
            self.loadbalancer_url(""),
            guard::sanitize_id(backend_id)
        );
        let status = if healthy { "healthy" } else { "unhealthy" };
        let body = json!({ "status": status });
        let result = self
            .call(Method::PUT, url, Some(body), &[StatusCode::OK, StatusCode::NO_CONTENT])
            .await;
        record_operation("report_backend_health", result.is_ok());
        result
    }

    /// Post an opaque metrics document.
    pub async fn post_metrics(&self, metrics: serde_json::Value) -> Result<(), ApiError> {
        let url = self.loadbalancer_url("/metrics");
        let result = self
            .call(Method::POST, url, Some(metrics), &[StatusCode::OK, StatusCode::CREATED])
            .await;
        record_operation("post_metrics", result.is_ok());
        result
    }

    /// Send a lifecycle event with free-form metadata.
    pub async fn send_event(
        &self,
        event_type: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<(), ApiError> {
        let url = self.loadbalancer_url("/events");
        let body = json!({
            "type": event_type,
            "message": message,
            "metadata": metadata,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let result = self
            .call(Method::POST, url, Some(body), &[StatusCode::OK, StatusCode::CREATED])
            .await;
        record_operation("send_event", result.is_ok());
        result
    }

    /// One non-retried request with status checking and connection-friendly
    /// draining, under the shared deadline.
    async fn call(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
        expected: &[StatusCode],
    ) -> Result<(), ApiError> {
        timeout(REQUEST_DEADLINE, async {
            let resp = self.send(method, &url, body).await?;
            if !expected.contains(&resp.status()) {
                return Err(status_error(resp).await);
            }
            drain(resp).await;
            Ok(())
        })
        .await
        .map_err(|_| ApiError::Deadline)
        .and_then(|r| r)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, reqwest::Error> {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await
    }

    fn loadbalancer_url(&self, suffix: &str) -> String {
        format!(
            "{}/loadbalancers/{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            guard::sanitize_id(&self.loadbalancer_id),
            suffix
        )
    }
}

/// Redirects are capped at three hops, must stay on the original host, and
/// must never downgrade HTTPS to HTTP.
fn redirect_policy() -> redirect::Policy {
    redirect::Policy::custom(|attempt| {
        let hops = attempt.previous().len();
        let same_host = attempt.previous().first().map(|u| u.host_str().map(str::to_owned))
            == Some(attempt.url().host_str().map(str::to_owned));
        let downgraded = attempt.previous().first().map(|u| u.scheme()) == Some("https")
            && attempt.url().scheme() != "https";

        if hops > MAX_REDIRECTS {
            attempt.error("stopped after 3 redirects")
        } else if !same_host {
            attempt.error("redirect to different host not allowed")
        } else if downgraded {
            attempt.error("redirect from HTTPS to HTTP not allowed")
        } else {
            attempt.follow()
        }
    })
}

/// Read at most `cap` bytes of the body, then stop. The remainder is never
/// requested, so an oversized response cannot stall the client.
async fn read_capped(mut resp: Response, cap: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut buf = Vec::new();
    while buf.len() < cap {
        match resp.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(cap - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(buf)
}

/// Consume up to [`DRAIN_LIMIT`] bytes so the underlying connection can
/// return to the pool, then drop the response.
async fn drain(mut resp: Response) {
    let mut seen = 0;
    while seen < DRAIN_LIMIT {
        match resp.chunk().await {
            Ok(Some(chunk)) => seen += chunk.len(),
            _ => break,
        }
    }
}

/// Build the error for a non-success response, clipping the surfaced body.
async fn status_error(resp: Response) -> ApiError {
    let code = resp.status().as_u16();
    let body = read_capped(resp, MAX_RESPONSE_SIZE).await.unwrap_or_default();
    ApiError::Status {
        code,
        body: truncate_error_message(&String::from_utf8_lossy(&body), ERROR_BODY_LIMIT),
    }
}

fn truncate_error_message(msg: &str, max_len: usize) -> String {
    if msg.len() <= max_len {
        return msg.to_string();
    }
    let mut end = max_len;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &msg[..end])
}

fn record_operation(operation: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("agent_api_requests_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
