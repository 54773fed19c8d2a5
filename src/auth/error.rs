use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::session_store::SessionError;

/// JSON error body: `{"error": {"type": "...", "code": "...", "message": "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Errors surfaced by the session-backed endpoints.
///
/// Failures of the ACS endpoint itself never reach the client as an error;
/// they become redirects.
#[derive(Debug)]
pub enum AuthError {
    /// No session cookie on the request
    MissingSession,

    /// Session not found
    SessionNotFound,

    /// Session has expired
    SessionExpired,

    /// Internal error during authentication
    Internal(String),
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => AuthError::SessionNotFound,
            SessionError::Expired => AuthError::SessionExpired,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::MissingSession => (
                StatusCode::UNAUTHORIZED,
                "missing_session",
                "Authentication required",
            ),
            AuthError::SessionNotFound => (
                StatusCode::UNAUTHORIZED,
                "session_not_found",
                "Session not found",
            ),
            AuthError::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                "session_expired",
                "Session has expired",
            ),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal authentication error");
                // Details stay in the logs
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal authentication error",
                )
            }
        };

        let body = ErrorResponse::with_type("authentication_error", code, message);
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingSession => write!(f, "Authentication required"),
            AuthError::SessionNotFound => write!(f, "Session not found"),
            AuthError::SessionExpired => write!(f, "Session has expired"),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}
