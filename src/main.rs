use std::net::SocketAddr;

use sqlx::postgres::PgPoolOptions;
use tokio::time::{self, Duration as TokioDuration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use casewatch::{config, db, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging: stdout plus a daily rotated file under ./logs
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "casewatch.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Keep the guards alive so the non-blocking writers flush on exit
    let _log_guards = (stdout_guard, file_guard);

    // Embedded defaults -> casewatch.toml -> CASEWATCH_CONFIG -> env/.env
    let app_cfg = config::load()?;
    config::ensure_upload_dirs(&app_cfg.uploads)?;

    let pool = PgPoolOptions::new()
        .max_connections(app_cfg.database.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(&app_cfg.database.url)
        .await?;
    db::init_db(&pool).await?;

    // `casewatch promote-admin <email>` grants the administrator role and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, email] = args.as_slice() {
        if command == "promote-admin" {
            let id = routes::auth::grant_admin(&pool, email)
                .await
                .map_err(|e| anyhow::anyhow!("cannot promote {}: {}", email, e))?;
            info!(user_id = %id, "Granted administrator role to {}", email);
            return Ok(());
        }
    }
    if !args.is_empty() {
        return Err(anyhow::anyhow!("usage: casewatch [promote-admin <email>]"));
    }

    let state = AppState::new(pool, app_cfg.clone())?;
    if !state.chain.is_enabled() {
        info!("Blockchain integration disabled; tier refresh and hash registration return 503");
    }

    // Periodic cleanup for per-endpoint rate limiters to avoid memory growth
    {
        let rl = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                ticker.tick().await;
                rl.cleanup_all().await;
            }
        });
    }

    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", app_cfg.server.host, app_cfg.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", app_cfg.server.host, app_cfg.server.port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Casewatch listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
