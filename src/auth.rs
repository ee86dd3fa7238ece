use crate::error::{AppError, AppResult};
use axum::http::{HeaderMap, StatusCode};

fn unauthorized(message: &str) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "invalid_api_key", message)
        .with_type("authentication_error")
        .with_param("Authorization")
}

/// Extracts the token from `Authorization: Bearer <token>`. The scheme is
/// matched case-insensitively; the token itself is forwarded, not checked.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<String> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        tracing::warn!("missing Authorization header");
        return Err(unauthorized("Missing authentication credentials"));
    };
    let token = value.to_str().ok().and_then(|raw| {
        let (scheme, rest) = raw.split_once(char::is_whitespace)?;
        let token = rest.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
    });
    token.ok_or_else(|| {
        tracing::warn!("malformed Authorization header");
        unauthorized("Invalid authorization header format. Expected format: Bearer YOUR_API_KEY")
    })
}
