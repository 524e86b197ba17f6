//! HTTP middleware: authentication, client identification, rate limiting,
//! request validation and security headers.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
