//! Ordering REST API client.
//!
//! Authenticated HTTP+JSON communication with the remote ordering service.
//! Every request attaches the persisted bearer token when one exists.
//! Transient failures (timeouts, connection errors, 5xx) are retried a
//! bounded number of times with a fixed, non-exponential delay; a 401 is
//! never retried and fires the global unauthenticated signal. The remote
//! schema is consumed as opaque JSON.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::AuthSession;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default automatic retries for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 2;
/// Fixed delay between retry attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Cannot reach the ordering API at {url}")]
    Connect { url: String },

    #[error("Connection to {url} timed out")]
    Timeout { url: String },

    #[error("Network error communicating with {url}: {message}")]
    Network { url: String, message: String },

    #[error("Session expired or invalid (HTTP 401)")]
    Unauthorized,

    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("Invalid JSON from the ordering API: {message}")]
    InvalidBody { message: String },
}

impl ApiError {
    /// Transient failures are worth an automatic retry: timeouts, connection
    /// errors, and server-side 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Connect { .. } | ApiError::Timeout { .. } | ApiError::Network { .. } => true,
            ApiError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

/// Convert a `reqwest::Error` into the taxonomy above.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_connect() {
        return ApiError::Connect {
            url: url.to_string(),
        };
    }
    ApiError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Fallback message for non-success statuses without a useful body.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        403 => "Not authorized for this operation".to_string(),
        404 => "Ordering API endpoint not found".to_string(),
        s if s >= 500 => "Ordering API server error".to_string(),
        _ => "Unexpected response from the ordering API".to_string(),
    }
}

// ---------------------------------------------------------------------------
// URL and query handling
// ---------------------------------------------------------------------------

/// Normalise the API base URL: strip trailing slashes and ensure a scheme
/// (https, or http for localhost).
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Append query parameters to a path. Null values are skipped; everything
/// else is rendered and percent-encoded.
pub fn build_query(path: &str, options: Option<&Value>) -> String {
    fn enc(s: &str) -> String {
        s.replace('%', "%25")
            .replace('&', "%26")
            .replace('=', "%3D")
            .replace(' ', "%20")
            .replace('+', "%2B")
            .replace('?', "%3F")
            .replace('#', "%23")
    }
    let mut query: Vec<(String, String)> = Vec::new();
    if let Some(Value::Object(map)) = options {
        for (k, v) in map {
            if v.is_null() {
                continue;
            }
            let sval = match v {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => v.to_string(),
            };
            if !sval.is_empty() {
                query.push((k.clone(), sval));
            }
        }
    }
    if query.is_empty() {
        return path.to_string();
    }
    let mut out = String::from(path);
    out.push('?');
    out.push_str(
        &query
            .iter()
            .map(|(k, v)| format!("{}={}", enc(k), enc(v)))
            .collect::<Vec<String>>()
            .join("&"),
    );
    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Retry policy and timeout knobs; the defaults match production.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct ApiClient {
    base_url: String,
    http: Client,
    auth: Arc<AuthSession>,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Arc<AuthSession>, config: ApiConfig) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            http,
            auth,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Perform an authenticated request. `path` includes the leading slash,
    /// e.g. `/Orders` or `/Reports/daily?date=2026-08-06`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0u32;
        loop {
            match self.send_once(method.clone(), &url, body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unauthorized() => {
                    // Never retried: the token is gone, not the network.
                    self.auth.handle_unauthenticated();
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        %url,
                        attempt,
                        max = self.config.max_retries,
                        error = %e,
                        "api: transient failure, retrying after fixed delay"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut req = self.http.request(method, url);
        if let Some(token) = self.auth.token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            // Preserve server-provided validation text for the UI.
            let body_text = resp.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<Value>(&body_text) {
                Ok(json) => json
                    .get("error")
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| status_message(status)),
                Err(_) if !body_text.trim().is_empty() => body_text.trim().to_string(),
                Err(_) => status_message(status),
            };
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Return the JSON body, or null for empty 204 responses.
        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        debug!(%url, bytes = body_text.len(), "api: response received");
        serde_json::from_str(&body_text).map_err(|e| ApiError::InvalidBody {
            message: e.to_string(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
