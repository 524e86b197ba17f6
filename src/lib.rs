//! # Casewatch Backend Library
//!
//! Casewatch is the backend of a platform for reporting corruption cases. Registered users
//! file cases and follow them through review; administrators move them along the lifecycle.
//! Features are gated by a service tier derived from the Ethereum balance of the user's
//! wallet. Case reports can be rendered as PDFs whose SHA-256 hash is anchored on chain and
//! verifiable through a QR code. Anyone can leave an anonymous secure entry without an account.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server, routing and middleware
//! - **SQLx**: PostgreSQL access with transactional migrations
//! - **Tokio**: async runtime
//! - **utoipa**: OpenAPI document for the `/api` surface
//!
//! ## Core Components
//!
//! - [`auth`]: password hashing and JWT sessions
//! - [`blockchain`]: Ethereum JSON-RPC client
//! - [`config`]: layered configuration
//! - [`db`]: schema migrations
//! - [`documents`]: PDF, QR code and digest helpers
//! - [`error`]: error type and HTTP error envelopes
//! - [`extract`]: JSON, query and path extractors that reject with the error envelope
//! - [`metrics`]: counters for monitoring
//! - [`middleware`]: authentication, rate limiting, validation and security headers
//! - [`routes`]: HTTP handlers and the router
//! - [`state`]: shared application state
//! - [`tiers`]: tier computation and the permission matrix
//! - [`types`]: request/response bodies and row types

pub mod auth;
pub mod blockchain;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod tiers;
pub mod types;

#[cfg(test)]
mod tests;
