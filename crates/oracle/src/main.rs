use anyhow::{anyhow, Context};
use axum::serve;
use futures::TryFutureExt;
use log::{error, info, warn};
use rate_oracle::{
    app, build_app_state, get_config_info, get_log_level, scheduler, setup_logger, CycleOutcome,
    Database,
};
use rate_oracle_core::create_dir_all;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = get_config_info();
    let log_level = get_log_level(&cli);

    setup_logger()
        .level(log_level)
        .level_for("rate_oracle", log_level)
        .level_for("http_response", log_level)
        .level_for("http_request", log_level)
        .level_for("sqlx", log::LevelFilter::Warn)
        .apply()?;

    let settings = cli.settings().map_err(|e| {
        error!("invalid configuration: {}", e);
        anyhow!("invalid configuration: {}", e)
    })?;

    create_dir_all(&settings.db_dir)
        .with_context(|| format!("error creating database directory {}", settings.db_dir))?;

    let socket_addr = SocketAddr::from_str(&format!("{}:{}", settings.host, settings.port))
        .map_err(|e| anyhow!("invalid address: {}", e))?;

    info!("Rate Oracle starting...");
    info!("  Listen: http://{}", socket_addr);
    info!("  Docs:   http://{}/docs", socket_addr);
    info!("  Database: {}", settings.db_dir);
    info!("  Source: {} (#{})", settings.source_url, settings.source_element);
    info!(
        "  Daily refresh: {} at UTC{}",
        settings.refresh_at, settings.utc_offset
    );

    let database = Arc::new(
        Database::new(&settings.db_dir)
            .await
            .map_err(|e| anyhow!("error setting up SQLite database: {}", e))?,
    );
    database
        .health_check()
        .await
        .map_err(|e| anyhow!("database health check failed: {}", e))?;

    let app_state = build_app_state(&settings, database.clone()).map_err(|e| {
        error!("error building app: {}", e);
        e
    })?;

    // Populate the cache before the listener accepts requests
    if let CycleOutcome::Resolved(resolution) = app_state.updater.run_cycle().await {
        info!(
            "initial rate {:.4} (source: {})",
            resolution.value(),
            resolution.source()
        );
    }
    if !app_state.cache.is_known() {
        warn!("no rate available yet, rate endpoints answer 503 until a refresh succeeds");
    }

    let refresher = scheduler::spawn_daily(
        app_state.updater.clone(),
        settings.refresh_at,
        settings.utc_offset,
    );

    let listener = TcpListener::bind(socket_addr)
        .map_err(|e| anyhow!("error binding to socket: {}", e))
        .await?;

    serve(
        listener,
        app(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    refresher.abort();
    database.checkpoint().await;
    info!("Rate Oracle stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
