use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// A failure ready to leave the gateway: an HTTP status plus the OpenAI
/// error envelope fields.
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
    pub error_type: String,
    pub param: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code.into()),
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: None,
        }
    }

    pub fn from_envelope(envelope: ErrorEnvelope, status: StatusCode) -> Self {
        let ErrorBody {
            message,
            error_type,
            param,
            code,
        } = envelope.error;
        Self {
            status,
            code,
            message,
            error_type,
            param,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.message.clone(),
                error_type: self.error_type.clone(),
                param: self.param.clone(),
                code: self.code.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, axum::Json(self.envelope())).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Numeric error codes used inside the gateway. Unknown values are
/// representable so that codes coming from elsewhere can still be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const SYSTEM_ERROR: Self = Self(-1000);
    pub const REQUEST_VALIDATION: Self = Self(-1001);
    pub const ROUTE_NOT_FOUND: Self = Self(-1002);
    pub const INVALID_API_KEY: Self = Self(-2001);
    pub const EXPIRED_API_KEY: Self = Self(-2002);
    pub const PERMISSION_DENIED: Self = Self(-2003);
    pub const RATE_LIMIT_EXCEEDED: Self = Self(-2004);
    pub const QUOTA_EXCEEDED: Self = Self(-2005);
    pub const MODEL_NOT_FOUND: Self = Self(-2006);
    pub const CONTEXT_LENGTH_EXCEEDED: Self = Self(-2007);
    pub const SERVICE_UNAVAILABLE: Self = Self(-2008);
    pub const TIMEOUT: Self = Self(-2009);
    pub const CONNECTION_ERROR: Self = Self(-2010);
    pub const INTERNAL_ERROR: Self = Self(-2011);
    pub const INVALID_REQUEST: Self = Self(-2012);
    pub const MISSING_REQUIRED_PARAM: Self = Self(-2013);
    pub const FILE_NOT_FOUND: Self = Self(-2100);
    pub const FILE_READ_ERROR: Self = Self(-2101);
    pub const FILE_FORMAT_ERROR: Self = Self(-2102);
    pub const FILE_UPLOAD_ERROR: Self = Self(-2103);
    pub const FILE_DOWNLOAD_ERROR: Self = Self(-2104);
    pub const FILE_PROCESSING_ERROR: Self = Self(-2105);
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An error raised inside the gateway with a known internal code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
    /// Overrides the status the code table would pick.
    pub http_status: Option<StatusCode>,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.http_status = Some(status);
        self
    }
}
