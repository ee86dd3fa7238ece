use crate::error::{ApiException, AppError, ErrorBody, ErrorCode, ErrorEnvelope};
use axum::http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    InvalidApiKey,
    InvalidRequestError,
    AuthenticationError,
    PermissionError,
    RateLimitError,
    QuotaExceededError,
    ApiError,
    ServiceUnavailable,
    InternalServerError,
    InvalidRequest,
    ModelNotFound,
    ContextLengthExceeded,
    TimeoutError,
    ConnectionError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::InvalidApiKey => "invalid_api_key",
            ErrorType::InvalidRequestError => "invalid_request_error",
            ErrorType::AuthenticationError => "authentication_error",
            ErrorType::PermissionError => "permission_error",
            ErrorType::RateLimitError => "rate_limit_error",
            ErrorType::QuotaExceededError => "quota_exceeded_error",
            ErrorType::ApiError => "api_error",
            ErrorType::ServiceUnavailable => "service_unavailable",
            ErrorType::InternalServerError => "internal_server_error",
            ErrorType::InvalidRequest => "invalid_request",
            ErrorType::ModelNotFound => "model_not_found",
            ErrorType::ContextLengthExceeded => "context_length_exceeded",
            ErrorType::TimeoutError => "timeout_error",
            ErrorType::ConnectionError => "connection_error",
        }
    }

    /// Status used when the type was inferred rather than looked up.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorType::InvalidApiKey | ErrorType::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorType::PermissionError => StatusCode::FORBIDDEN,
            ErrorType::RateLimitError | ErrorType::QuotaExceededError => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorType::InvalidRequest
            | ErrorType::InvalidRequestError
            | ErrorType::ContextLengthExceeded => StatusCode::BAD_REQUEST,
            ErrorType::ModelNotFound => StatusCode::NOT_FOUND,
            ErrorType::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorType::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
            ErrorType::ConnectionError => StatusCode::BAD_GATEWAY,
            ErrorType::ApiError | ErrorType::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code used when the type was inferred.
    pub fn code(self) -> Option<&'static str> {
        match self {
            ErrorType::InvalidApiKey => Some("invalid_api_key"),
            ErrorType::RateLimitError => Some("rate_limit_exceeded"),
            ErrorType::QuotaExceededError => Some("quota_exceeded"),
            ErrorType::ModelNotFound => Some("model_not_found"),
            ErrorType::ContextLengthExceeded => Some("context_length_exceeded"),
            ErrorType::TimeoutError => Some("timeout"),
            ErrorType::ConnectionError => Some("connection_error"),
            _ => None,
        }
    }
}

struct CodeMapping {
    code: ErrorCode,
    error_type: ErrorType,
    status: StatusCode,
    machine_code: Option<&'static str>,
}

const fn entry(
    code: ErrorCode,
    error_type: ErrorType,
    status: StatusCode,
    machine_code: Option<&'static str>,
) -> CodeMapping {
    CodeMapping {
        code,
        error_type,
        status,
        machine_code,
    }
}

static CODE_TABLE: &[CodeMapping] = &[
    entry(ErrorCode::SYSTEM_ERROR, ErrorType::InternalServerError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::REQUEST_VALIDATION, ErrorType::InvalidRequest, StatusCode::BAD_REQUEST, None),
    entry(ErrorCode::ROUTE_NOT_FOUND, ErrorType::InvalidRequest, StatusCode::NOT_FOUND, None),
    entry(ErrorCode::INVALID_API_KEY, ErrorType::AuthenticationError, StatusCode::UNAUTHORIZED, Some("invalid_api_key")),
    entry(ErrorCode::EXPIRED_API_KEY, ErrorType::AuthenticationError, StatusCode::UNAUTHORIZED, Some("expired_api_key")),
    entry(ErrorCode::PERMISSION_DENIED, ErrorType::PermissionError, StatusCode::FORBIDDEN, None),
    entry(ErrorCode::RATE_LIMIT_EXCEEDED, ErrorType::RateLimitError, StatusCode::TOO_MANY_REQUESTS, Some("rate_limit_exceeded")),
    entry(ErrorCode::QUOTA_EXCEEDED, ErrorType::QuotaExceededError, StatusCode::TOO_MANY_REQUESTS, Some("quota_exceeded")),
    entry(ErrorCode::MODEL_NOT_FOUND, ErrorType::ModelNotFound, StatusCode::NOT_FOUND, Some("model_not_found")),
    entry(ErrorCode::CONTEXT_LENGTH_EXCEEDED, ErrorType::ContextLengthExceeded, StatusCode::BAD_REQUEST, Some("context_length_exceeded")),
    entry(ErrorCode::SERVICE_UNAVAILABLE, ErrorType::ServiceUnavailable, StatusCode::SERVICE_UNAVAILABLE, None),
    entry(ErrorCode::TIMEOUT, ErrorType::TimeoutError, StatusCode::GATEWAY_TIMEOUT, Some("timeout")),
    entry(ErrorCode::CONNECTION_ERROR, ErrorType::ConnectionError, StatusCode::BAD_GATEWAY, Some("connection_error")),
    entry(ErrorCode::INTERNAL_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::INVALID_REQUEST, ErrorType::InvalidRequestError, StatusCode::BAD_REQUEST, None),
    entry(ErrorCode::MISSING_REQUIRED_PARAM, ErrorType::InvalidRequestError, StatusCode::BAD_REQUEST, None),
    entry(ErrorCode::FILE_NOT_FOUND, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::FILE_READ_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::FILE_FORMAT_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::FILE_UPLOAD_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::FILE_DOWNLOAD_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
    entry(ErrorCode::FILE_PROCESSING_ERROR, ErrorType::ApiError, StatusCode::INTERNAL_SERVER_ERROR, None),
];

/// Evaluated top to bottom; the first rule with a matching needle wins.
static KEYWORD_RULES: &[(&[&str], ErrorType)] = &[
    (&["api key", "api_key"], ErrorType::InvalidApiKey),
    (&["authentication", "unauthorized"], ErrorType::AuthenticationError),
    (&["permission", "forbidden"], ErrorType::PermissionError),
    (&["rate limit"], ErrorType::RateLimitError),
    (&["quota"], ErrorType::QuotaExceededError),
    (&["invalid request", "bad request"], ErrorType::InvalidRequest),
    (&["model not found", "model_not_found"], ErrorType::ModelNotFound),
    (&["context length", "token limit"], ErrorType::ContextLengthExceeded),
    (&["timeout", "timed out"], ErrorType::TimeoutError),
    (&["connection"], ErrorType::ConnectionError),
    (&["service unavailable", "temporarily unavailable"], ErrorType::ServiceUnavailable),
];

/// What went wrong, as far as the caller can tell.
pub enum ErrorSource<'a> {
    Api(&'a ApiException),
    Error(&'a (dyn std::error::Error + 'a)),
    Text(&'a str),
    Unknown,
}

fn lookup(code: ErrorCode) -> Option<&'static CodeMapping> {
    CODE_TABLE.iter().find(|m| m.code == code)
}

pub fn infer_error_type(message: &str) -> ErrorType {
    let lower = message.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, ty)| *ty)
        .unwrap_or(ErrorType::ApiError)
}

fn envelope(
    message: String,
    error_type: &str,
    param: Option<&str>,
    code: Option<&str>,
) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorBody {
            message,
            error_type: error_type.to_string(),
            param: param.map(str::to_string),
            code: code.map(str::to_string),
        },
    }
}

/// Turns any failure into the OpenAI error envelope and the HTTP status to
/// send it with. Never fails.
pub fn map_error(source: ErrorSource<'_>, param: Option<&str>) -> (ErrorEnvelope, StatusCode) {
    match source {
        ErrorSource::Api(exc) => match lookup(exc.code) {
            Some(m) => (
                envelope(exc.message.clone(), m.error_type.as_str(), param, m.machine_code),
                exc.http_status.unwrap_or(m.status),
            ),
            None => (
                envelope(
                    exc.message.clone(),
                    ErrorType::ApiError.as_str(),
                    param,
                    Some("internal_error"),
                ),
                exc.http_status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ),
        },
        ErrorSource::Error(err) => {
            let message = err.to_string();
            let ty = infer_error_type(&message);
            (envelope(message, ty.as_str(), param, ty.code()), ty.status())
        }
        ErrorSource::Text(text) => (
            envelope(text.to_string(), ErrorType::ApiError.as_str(), param, None),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        ErrorSource::Unknown => (
            envelope(
                "An unknown error occurred".to_string(),
                ErrorType::ApiError.as_str(),
                param,
                Some("unknown_error"),
            ),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

impl ApiException {
    pub fn into_app_error(self, param: Option<&str>) -> AppError {
        let (envelope, status) = map_error(ErrorSource::Api(&self), param);
        AppError::from_envelope(envelope, status)
    }
}

impl From<ApiException> for AppError {
    fn from(exc: ApiException) -> Self {
        exc.into_app_error(None)
    }
}
