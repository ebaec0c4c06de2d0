//! Error types for RustResort
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401) — spec error kind `unauthenticated`
    #[error("Authentication required")]
    Unauthorized,

    /// Outbox owner does not match the authenticated user (401) — spec error
    /// kind `unauthorized_create`
    #[error("Not authorized to post to this outbox")]
    UnauthorizedCreate,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unprocessable entity (422)
    #[error("Unprocessable entity: {0}")]
    Unprocessable(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// R2 storage error (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encryption/decryption error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Rate limit exceeded (429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Not implemented (501)
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Inbox/outbox body could not be parsed as an activity (400)
    #[error("Malformed activity body: {0}")]
    MalformedBody(String),

    /// HTTP-signature keyId actor does not match the activity's actor (401)
    #[error("Signer does not match activity actor")]
    ActorSpoofed,

    /// Update/Like/Announce target object does not match the stored object (422)
    #[error("Object does not match stored record: {0}")]
    ObjectSpoofed(String),

    /// Activity is missing a required `actor` field (400)
    #[error("Activity is missing actor")]
    ActorRequired,

    /// Activity is missing a required `object` field (400)
    #[error("Activity is missing object")]
    ObjectRequired,

    /// Activity is missing a required `target` field (400)
    #[error("Activity is missing target")]
    TargetRequired,

    /// Resource existed but was deleted; responds with its Tombstone (410)
    #[error("Resource gone: {0}")]
    Gone(String),

    /// Sender or recipient is on a block list (403)
    #[error("Blocked")]
    Blocked,

    /// Undo references an activity type that cannot be undone (422)
    #[error("Undo not supported for type: {0}")]
    UndoTypeNotSupported(String),

    /// Opaque internal database failure distinct from a sqlx driver error (500)
    #[error("Internal database error: {0}")]
    InternalDatabaseError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, self.to_string(), "unauthenticated")
            }
            AppError::UnauthorizedCreate => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "unauthorized_create",
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "invalid_signature",
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string(), "forbidden"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg.clone(),
                "unprocessable",
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                self.to_string(),
                "rate_limited",
            ),
            AppError::NotImplemented(msg) => {
                (StatusCode::NOT_IMPLEMENTED, msg.clone(), "not_implemented")
            }
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), "federation"),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string(), "http_client"),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "storage"),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Encryption(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "encryption")
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
            AppError::MalformedBody(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "malformed_body")
            }
            AppError::ActorSpoofed => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "actor_spoofed",
            ),
            AppError::ObjectSpoofed(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone(), "object_spoofed")
            }
            AppError::ActorRequired => {
                (StatusCode::BAD_REQUEST, self.to_string(), "actor_required")
            }
            AppError::ObjectRequired => {
                (StatusCode::BAD_REQUEST, self.to_string(), "object_required")
            }
            AppError::TargetRequired => {
                (StatusCode::BAD_REQUEST, self.to_string(), "target_required")
            }
            AppError::Gone(msg) => (StatusCode::GONE, msg.clone(), "gone"),
            AppError::Blocked => (StatusCode::FORBIDDEN, self.to_string(), "blocked"),
            AppError::UndoTypeNotSupported(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg.clone(),
                "undo_type_not_supported",
            ),
            AppError::InternalDatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
                "internal_database_error",
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
