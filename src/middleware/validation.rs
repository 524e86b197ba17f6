use axum::{
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::AppError;

/// Room for multipart boundaries and the description field on top of the file itself.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Largest request body the service accepts.
pub fn max_body_size(cfg: &AppConfig) -> usize {
    cfg.uploads.max_file_size + MULTIPART_OVERHEAD
}

/// Rejects path traversal attempts in the URI and declared bodies larger than
/// [`max_body_size`] before any handler runs.
pub async fn validate_request_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    if contains_path_traversal(req.uri().path()) {
        return AppError::BadRequest("Path traversal detected in request".to_string()).into_response();
    }

    if let Some(user_agent) = req.headers().get("user-agent").and_then(|ua| ua.to_str().ok()) {
        if is_suspicious_user_agent(user_agent) {
            tracing::warn!("Suspicious user agent detected: {}", user_agent);
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let limit = max_body_size(&cfg);
        if let Some(length) = declared.filter(|&l| l > limit) {
            return AppError::PayloadTooLarge(format!(
                "Request body of {} bytes exceeds maximum size of {} bytes",
                length, limit
            ))
            .into_response();
        }
    }

    next.run(req).await
}

/// Detects `..` segments, including percent-encoded and double-encoded forms, and NUL bytes.
pub fn contains_path_traversal(path: &str) -> bool {
    if path.contains('\0') {
        return true;
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return true;
    }
    let lower = path.to_lowercase();
    ["%2e%2e", "%252e%252e", "%2e.", ".%2e", "%00", "%5c"]
        .iter()
        .any(|p| lower.contains(p))
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ["sqlmap", "nikto", "havij", "masscan", "nmap"].iter().any(|s| ua_lower.contains(s))
}
