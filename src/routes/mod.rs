//! HTTP route handlers and the router that wires them together.
//!
//! - `auth`: registration, login, profile, wallet and password
//! - `cases`: case filing, listing, lifecycle changes and the audit trail
//! - `documents`: report generation, download, on-chain registration, verification and sharing
//! - `health`: liveness, readiness, metrics and version endpoints
//! - `secure_entry`: anonymous submissions and their administration
//! - `tiers`: tier status, balance refresh and administrator overrides

pub mod auth;
pub mod cases;
pub mod documents;
pub mod health;
pub mod secure_entry;
pub mod tiers;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::middleware::{
    auth::{require_admin, require_auth},
    rate_limit::rate_limit_middleware,
    security_headers::security_headers_middleware,
    validation::{max_body_size, validate_request_middleware},
};
use crate::openapi;
use crate::state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Routes reachable without a token.
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/documents/verify/{hash}", get(documents::verify_document))
        .route("/api/secure-entry", post(secure_entry::submit_entry))
        .route("/api/secure-entry/{reference_code}", get(secure_entry::entry_status))
}

/// Routes for any authenticated user.
fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/wallet", put(auth::update_wallet))
        .route("/api/auth/password", put(auth::change_password))
        .route("/api/cases", post(cases::create_case).get(cases::list_cases))
        .route(
            "/api/cases/{id}",
            get(cases::get_case).put(cases::update_case).delete(cases::delete_case),
        )
        .route("/api/cases/{id}/escalate", post(cases::escalate_case))
        .route("/api/cases/{id}/activities", get(cases::list_activities))
        .route("/api/documents", get(documents::list_documents))
        .route("/api/documents/generate", post(documents::generate_document))
        .route("/api/documents/{id}", get(documents::get_document))
        .route("/api/documents/{id}/download", get(documents::download_document))
        .route("/api/documents/{id}/register", post(documents::register_document))
        .route("/api/documents/{id}/share", post(documents::share_document))
        .route("/api/documents/{id}/shares", get(documents::list_shares))
        .route("/api/documents/{id}/shares/{share_id}", delete(documents::revoke_share))
        .route("/api/documents/{id}/access-logs", get(documents::list_access_logs))
        .route("/api/tiers/current", get(tiers::current_tier))
        .route("/api/tiers/refresh", post(tiers::refresh_tier))
        .route("/api/tiers/history", get(tiers::tier_history))
        .route("/api/tiers/permissions", get(tiers::permission_matrix))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

/// Routes restricted to administrators.
fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/tiers/users/{id}", put(tiers::set_user_tier))
        .route("/api/secure-entry", get(secure_entry::list_entries))
        .route("/api/secure-entry/{reference_code}/status", put(secure_entry::update_entry_status))
        .route("/api/secure-entry/{reference_code}/file", get(secure_entry::download_entry_file))
        // Layers run outside-in: authentication first, then the role check.
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

/// Builds the complete application router with all middleware.
pub fn app(state: AppState) -> Router {
    let cfg = state.config.clone();

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .merge(public_routes())
        .merge(user_routes(&state))
        .merge(admin_routes(&state))
        // Only QR codes are public; reports and submitted files go through access checks.
        .nest_service("/uploads/qrcodes", ServeDir::new(cfg.uploads.qrcodes_dir()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_size(&cfg)))
        .layer(from_fn_with_state(cfg.clone(), validate_request_middleware))
        .layer(from_fn(rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg.clone(), security_headers_middleware))
        .layer(cors_layer(&cfg.server.cors_origins))
}
