//! Error types for the routine scheduler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Top-level error type for the scheduler core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the `RoutineStore` abstraction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Request to store failed: {0}")]
    Request(String),

    #[error("Store returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors resolving the caller's identity.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Result type alias used throughout the scheduler core.
pub type Result<T> = std::result::Result<T, Error>;

/// REST-facing error, mapped to the `{"error": {"code", "message"}}` envelope.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Validation(String),
    Unauthorized,
    NotFound(String),
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Validation(m) => m.clone(),
            ApiError::Unauthorized => "missing or invalid bearer token".to_string(),
            ApiError::NotFound(m) => m.clone(),
            ApiError::Internal(m) => crate::model::truncate(m, 200),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": { "code": self.code(), "message": self.message() }
        }));
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(e) => ApiError::Internal(e.to_string()),
            Error::Store(StoreError::NotFound { entity, id }) => {
                ApiError::NotFound(format!("{entity} {id} not found"))
            }
            Error::Store(e) => ApiError::Internal(e.to_string()),
            Error::Auth(_) => ApiError::Unauthorized,
            Error::Validation(m) => ApiError::Validation(m),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::Unauthorized
    }
}
