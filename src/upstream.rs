use crate::config::{ProviderAuthConfig, ProviderAuthType, ProviderConfig};
use crate::error::{ApiException, ErrorCode};
use axum::http::StatusCode;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Timeout,
    Network,
    Http,
    Decode,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            code: None,
            message,
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    fn from_reqwest(err: reqwest::Error, status: Option<StatusCode>) -> Self {
        let kind = if err.is_timeout() {
            UpstreamErrorKind::Timeout
        } else if err.is_decode() {
            UpstreamErrorKind::Decode
        } else {
            UpstreamErrorKind::Network
        };
        Self::new(kind, status, err.to_string())
    }
}

impl From<UpstreamCallError> for ApiException {
    fn from(err: UpstreamCallError) -> Self {
        let message = err.message;
        match err.kind {
            UpstreamErrorKind::Timeout => ApiException::new(ErrorCode::TIMEOUT, message),
            UpstreamErrorKind::Network => ApiException::new(ErrorCode::CONNECTION_ERROR, message),
            UpstreamErrorKind::Decode => ApiException::new(ErrorCode::INTERNAL_ERROR, message)
                .with_status(StatusCode::BAD_GATEWAY),
            UpstreamErrorKind::Http => {
                let status = err.status.unwrap_or(StatusCode::BAD_GATEWAY);
                match status.as_u16() {
                    400 | 404 | 413 | 422 => {
                        ApiException::new(ErrorCode::INVALID_REQUEST, message).with_status(status)
                    }
                    401 => ApiException::new(ErrorCode::INVALID_API_KEY, message),
                    403 => ApiException::new(ErrorCode::PERMISSION_DENIED, message),
                    408 | 504 => ApiException::new(ErrorCode::TIMEOUT, message),
                    429 => ApiException::new(ErrorCode::RATE_LIMIT_EXCEEDED, message),
                    503 => ApiException::new(ErrorCode::SERVICE_UNAVAILABLE, message),
                    _ => ApiException::new(ErrorCode::INTERNAL_ERROR, message)
                        .with_status(StatusCode::BAD_GATEWAY),
                }
            }
        }
    }
}

/// Everything needed to reach one backend for one request.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCall<'a> {
    pub provider: &'a ProviderConfig,
    /// The caller's bearer token, forwarded when the provider has no key of its own.
    pub caller_token: &'a str,
    pub timeout_ms: u64,
    pub extra_headers: &'a [(&'a str, &'a str)],
}

fn build_request(
    client: &reqwest::Client,
    call: UpstreamCall<'_>,
    path: &str,
    body: &Value,
) -> reqwest::RequestBuilder {
    let url = join_url(&call.provider.base_url, path);
    let mut req = apply_auth(client.post(url).json(body), &call.provider.auth, call.caller_token);
    for (k, v) in call.extra_headers {
        req = req.header(*k, *v);
    }
    req
}

/// Non-2xx statuses come back as `UpstreamErrorKind::Http` with the body text.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamCallError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let code = extract_error_code(&text);
    Err(UpstreamCallError::new(
        UpstreamErrorKind::Http,
        Some(status),
        format!(
            "upstream status {}: {}",
            status.as_u16(),
            upstream_error_message(&text)
        ),
    )
    .with_code(code))
}

/// Posts `body` and returns the response once its status is known, leaving
/// the body unread. The timeout bounds only the wait for response headers,
/// so a streamed body may run for as long as the backend keeps it open.
pub async fn call_upstream_raw(
    client: &reqwest::Client,
    call: UpstreamCall<'_>,
    path: &str,
    body: &Value,
) -> Result<reqwest::Response, UpstreamCallError> {
    let timeout = Duration::from_millis(call.timeout_ms);
    let send = build_request(client, call, path, body).send();
    let resp = match tokio::time::timeout(timeout, send).await {
        Ok(sent) => sent.map_err(|err| UpstreamCallError::from_reqwest(err, None))?,
        Err(_) => {
            return Err(UpstreamCallError::new(
                UpstreamErrorKind::Timeout,
                None,
                format!("upstream did not respond within {} ms", call.timeout_ms),
            ));
        }
    };
    check_status(resp).await
}

/// Posts `body` and parses the JSON reply. The timeout covers the whole
/// exchange, body included.
pub async fn call_upstream(
    client: &reqwest::Client,
    call: UpstreamCall<'_>,
    path: &str,
    body: &Value,
) -> Result<Value, UpstreamCallError> {
    let resp = build_request(client, call, path, body)
        .timeout(Duration::from_millis(call.timeout_ms))
        .send()
        .await
        .map_err(|err| UpstreamCallError::from_reqwest(err, None))?;
    let resp = check_status(resp).await?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|err| UpstreamCallError::from_reqwest(err, Some(status)))?;
    serde_json::from_str(&text).map_err(|err| {
        UpstreamCallError::new(
            UpstreamErrorKind::Decode,
            Some(status),
            format!("malformed upstream body: {err}"),
        )
    })
}

fn apply_auth(
    req: reqwest::RequestBuilder,
    auth: &ProviderAuthConfig,
    caller_token: &str,
) -> reqwest::RequestBuilder {
    let value = auth.value.as_deref().unwrap_or(caller_token);
    match auth.auth_type {
        ProviderAuthType::Bearer => req.bearer_auth(value),
        ProviderAuthType::Header => {
            let header_name = auth.header_name.as_deref().unwrap_or("x-api-key");
            req.header(header_name, value)
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if path == "v1" {
            path = "";
        } else if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

fn extract_error_code(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let error = value.get("error")?;
    error
        .get("code")
        .or_else(|| error.get("type"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Pulls a readable message out of an upstream error body, falling back to
/// the raw text.
pub fn upstream_error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.to_string())
}
