use lambda_http::{http::StatusCode, Body, Response};
use thiserror::Error;

use crate::gemini::GeminiError;
use crate::razorpay::RazorpayError;
use crate::response::json_response;

/// Every handler failure, mapped onto an HTTP status by [`ApiError::status`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    AuthFailed(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Wrap a downstream (AWS) failure, keeping its message for the client.
    pub fn internal<E>(context: &str, err: E) -> Self
    where
        E: std::fmt::Display + std::fmt::Debug,
    {
        tracing::error!("{}: {:?}", context, err);
        Self::Internal(format!("{}: {}", context, err))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, self);
        } else {
            tracing::warn!("Request rejected with {}: {}", status, self);
        }
        json_response(
            status,
            &serde_json::json!({ "success": false, "message": self.to_string() }),
        )
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal("Failed to encode JSON", err)
    }
}

impl From<GeminiError> for ApiError {
    fn from(err: GeminiError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<RazorpayError> for ApiError {
    fn from(err: RazorpayError) -> Self {
        match err {
            RazorpayError::MissingAccountNumber => {
                ApiError::Unavailable("RazorpayX account number")
            }
            RazorpayError::InvalidId(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}
