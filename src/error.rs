use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::tiers::{Feature, Tier};

/// The primary error type for the application.
///
/// Every handler returns [`AppResult`]; the variants decide the HTTP status and the
/// machine-readable `code` of the JSON error envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// The caller's tier does not grant a feature, or its quota is used up.
    #[error("Feature '{feature}' is not available for {current}")]
    TierRestricted {
        feature: Feature,
        current: Tier,
        required: Option<Tier>,
        limit: Option<i64>,
    },
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Blockchain error: {0}")]
    Blockchain(String),
    #[error("Rate limited. Retry after {retry_after_seconds} seconds")]
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    #[error("Validation error on field '{field}': {message}")]
    ValidationError { field: String, message: String },
    #[error("I/O error: {0}")]
    IoError(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::ValidationError { field: field.to_string(), message: message.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Database(msg) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::TierRestricted { feature, current, required, limit } => {
                let message = match (required, limit) {
                    (_, Some(limit)) => format!(
                        "{} allows at most {} active cases for '{}'",
                        current.label(),
                        limit,
                        feature
                    ),
                    (Some(required), None) => format!(
                        "Feature '{}' requires {} or higher (current: {})",
                        feature,
                        required.label(),
                        current.label()
                    ),
                    (None, None) => format!("Feature '{}' is disabled", feature),
                };
                (
                    StatusCode::FORBIDDEN,
                    "TIER_RESTRICTED",
                    message,
                    Some(json!({
                        "feature": feature,
                        "current_tier": current,
                        "required_tier": required,
                        "limit": limit,
                    })),
                )
            }
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg, None)
            }
            AppError::Blockchain(msg) => {
                tracing::warn!("Blockchain error: {}", msg);
                (StatusCode::BAD_GATEWAY, "BLOCKCHAIN_ERROR", msg, None)
            }
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::IoError(msg) => {
                tracing::error!("I/O error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An I/O error occurred".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

/// Postgres SQLSTATE codes the API maps to client errors.
mod pg_codes {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some(pg_codes::UNIQUE_VIOLATION) => {
                        AppError::Conflict(format!("Resource already exists ({})", constraint))
                    }
                    Some(pg_codes::FOREIGN_KEY_VIOLATION) => AppError::BadRequest(format!(
                        "Referenced resource does not exist ({})",
                        constraint
                    )),
                    Some(pg_codes::CHECK_VIOLATION) => AppError::ValidationError {
                        field: constraint,
                        message: "Value violates a constraint".to_string(),
                    },
                    Some(pg_codes::INVALID_TEXT_REPRESENTATION) => {
                        AppError::BadRequest("Invalid input syntax".to_string())
                    }
                    _ => AppError::Database(db_err.message().to_string()),
                }
            }
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Unauthorized("Token expired".to_string())
            }
            _ => AppError::Unauthorized("Invalid token".to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => AppError::validation("body", e.body_text()),
            other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::PayloadTooLarge(other.body_text())
            }
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation("query", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        if rejection.status().is_server_error() {
            AppError::Internal(anyhow::anyhow!(rejection.body_text()))
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// Converts an `Option` into a `NotFound` error naming the missing entity.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Request body validation helpers.
pub mod validation {
    use super::*;

    pub const MAX_EMAIL_LEN: usize = 254;
    pub const MAX_PASSWORD_LEN: usize = 128;

    /// Trims `value` and checks its character count against `min..=max`.
    pub fn validate_length(value: &str, field: &str, min: usize, max: usize) -> AppResult<String> {
        let trimmed = value.trim();
        let len = trimmed.chars().count();
        if len < min {
            return Err(AppError::validation(
                field,
                if min == 1 {
                    "Value cannot be empty".to_string()
                } else {
                    format!("Must be at least {} characters", min)
                },
            ));
        }
        if len > max {
            return Err(AppError::validation(field, format!("Must be at most {} characters", max)));
        }
        Ok(trimmed.to_string())
    }

    /// Same as [`validate_length`] for optional fields; blank strings become `None`.
    pub fn validate_optional(
        value: Option<&str>,
        field: &str,
        max: usize,
    ) -> AppResult<Option<String>> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(v) => validate_length(v, field, 1, max).map(Some),
        }
    }

    /// Normalizes an email address to lowercase after a structural check.
    pub fn validate_email(email: &str) -> AppResult<String> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || email.len() > MAX_EMAIL_LEN {
            return Err(AppError::validation("email", "Email must be 1-254 characters"));
        }
        let mut parts = email.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(d), None) => (l, d),
            _ => return Err(AppError::validation("email", "Email must contain exactly one '@'")),
        };
        let domain_ok = domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !domain.contains("..");
        if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
            return Err(AppError::validation("email", "Email address is malformed"));
        }
        Ok(email)
    }

    pub fn validate_password(password: &str, min_len: usize) -> AppResult<()> {
        let len = password.chars().count();
        if len < min_len {
            return Err(AppError::validation(
                "password",
                format!("Password must be at least {} characters", min_len),
            ));
        }
        if len > MAX_PASSWORD_LEN {
            return Err(AppError::validation(
                "password",
                format!("Password must be at most {} characters", MAX_PASSWORD_LEN),
            ));
        }
        Ok(())
    }

    /// Checks the `0x` + 40 hex digit shape and returns the lowercase form.
    pub fn validate_wallet_address(address: &str) -> AppResult<String> {
        let address = address.trim();
        if !crate::blockchain::is_eth_address(address) {
            return Err(AppError::validation(
                "wallet_address",
                "Wallet address must be 0x followed by 40 hex digits",
            ));
        }
        Ok(address.to_lowercase())
    }

    /// Clamps pagination input to `page >= 1` and `1 <= limit <= 100`.
    pub fn validate_pagination(page: Option<i64>, limit: Option<i64>) -> AppResult<(i64, i64)> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(20);
        if page < 1 {
            return Err(AppError::validation("page", format!("Value must be positive, got {}", page)));
        }
        if !(1..=100).contains(&limit) {
            return Err(AppError::validation("limit", "Value must be between 1 and 100"));
        }
        Ok((page, limit))
    }
}
