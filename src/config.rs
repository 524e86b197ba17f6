use std::path::PathBuf;

use serde::Deserialize;

use crate::blockchain::is_eth_address;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Absolute base URL embedded in QR codes (no trailing slash).
    pub public_base_url: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    pub max_file_size: usize,
    pub allowed_types: Vec<String>,
}

impl UploadsConfig {
    pub fn documents_dir(&self) -> PathBuf {
        self.dir.join("documents")
    }

    pub fn qrcodes_dir(&self) -> PathBuf {
        self.dir.join("qrcodes")
    }

    pub fn secure_dir(&self) -> PathBuf {
        self.dir.join("secure")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainConfig {
    pub enabled: bool,
    pub rpc_url: String,
    #[serde(default)]
    pub registrar_address: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub uploads: UploadsConfig,
    pub blockchain: BlockchainConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // The embedded defaults are part of the binary; failing here is a build defect.
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
        {
            Ok(app_cfg) => app_cfg,
            Err(e) => panic!("embedded default config is invalid: {}", e),
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: casewatch.toml (in CWD)
        .add_source(::config::File::with_name("casewatch").required(false));

    if let Ok(custom_path) = std::env::var("CASEWATCH_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("CASEWATCH").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if cfg.server.public_base_url.ends_with('/') {
        return Err(anyhow::anyhow!("server.public_base_url must not end with '/'"));
    }

    if cfg.database.max_connections == 0 {
        return Err(anyhow::anyhow!("database.max_connections must be > 0"));
    }

    if cfg.auth.jwt_secret.len() < 32 {
        return Err(anyhow::anyhow!("auth.jwt_secret must be at least 32 bytes"));
    }
    if !(1..=720).contains(&cfg.auth.token_ttl_hours) {
        return Err(anyhow::anyhow!("auth.token_ttl_hours must be in 1..=720"));
    }
    if cfg.auth.min_password_length < 6 {
        return Err(anyhow::anyhow!("auth.min_password_length must be >= 6"));
    }

    if cfg.uploads.max_file_size == 0 {
        return Err(anyhow::anyhow!("uploads.max_file_size must be > 0"));
    }
    if cfg.uploads.allowed_types.is_empty() {
        return Err(anyhow::anyhow!("uploads.allowed_types must not be empty"));
    }

    if cfg.blockchain.enabled {
        if !is_eth_address(&cfg.blockchain.registrar_address) {
            return Err(anyhow::anyhow!(
                "blockchain.registrar_address must be a 0x-prefixed 20-byte hex address when blockchain is enabled"
            ));
        }
        if cfg.blockchain.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("blockchain.request_timeout_secs must be > 0"));
        }
    }

    Ok(())
}

/// Creates the upload directory tree used for generated and submitted files.
pub fn ensure_upload_dirs(uploads: &UploadsConfig) -> anyhow::Result<()> {
    for dir in [uploads.documents_dir(), uploads.qrcodes_dir(), uploads.secure_dir()] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
