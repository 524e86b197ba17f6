use std::sync::Arc;

use sqlx::PgPool;

use crate::blockchain::EthClient;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::tiers::PermissionStore;

/// The shared application state.
///
/// Cheap to clone; every handler receives its own copy through Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The PostgreSQL connection pool.
    pub db: PgPool,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Request and domain counters exposed under `/metrics`.
    pub metrics: Metrics,
    /// Per-endpoint limits on top of the global per-IP limiter.
    pub rate_limiter: EndpointRateLimiter,
    /// Cached tier permission matrix.
    pub permissions: PermissionStore,
    /// Ethereum RPC access for balances and hash registration.
    pub chain: EthClient,
}

impl AppState {
    /// Creates the state with the default endpoint limits:
    /// - 10 logins per minute
    /// - 5 registrations per minute
    /// - 10 secure entry submissions per 10 minutes
    pub fn new(db: PgPool, config: AppConfig) -> anyhow::Result<Self> {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/api/auth/login", 10, 60),
            ("/api/auth/register", 5, 60),
            ("/api/secure-entry", 10, 600),
        ]);
        let chain = EthClient::new(&config.blockchain)?;

        Ok(Self {
            db,
            config: Arc::new(config),
            metrics: Metrics::new(),
            rate_limiter,
            permissions: PermissionStore::new(),
            chain,
        })
    }
}
