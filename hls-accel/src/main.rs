use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hls_accel::api::{ApiServer, ApiServerConfig, AppState};
use hls_accel::cache::CacheStore;
use hls_accel::config::{AppConfig, ConfigSource, DEFAULT_CONFIG_FILE};
use hls_accel::database::{self, repositories::SqlxTaskRepository};
use hls_accel::engine::Aria2Client;
use hls_accel::logging::init_logging;
use hls_accel::proxy::{ProxyService, UpstreamClient};
use hls_accel::task::TaskManager;
use hls_accel::utils::fs::ensure_dir_all_with_op;
use hls_accel::utils::http_client::{header_map, install_rustls_provider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    install_rustls_provider();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HLS_ACCEL_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let (config, source) = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let (logging_config, _log_guard) = init_logging(&config.log_dir)?;

    match &source {
        ConfigSource::File(path) => tracing::info!(path = %path.display(), "Loaded configuration file"),
        ConfigSource::Defaults => tracing::info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        ),
    }

    ensure_dir_all_with_op("creating cache root", &config.cache_dir).await?;

    let database_url = config.database_url();
    let pool = database::init_pool(&database_url)
        .await
        .with_context(|| format!("opening database {database_url}"))?;
    database::run_migrations(&pool).await?;

    let repo = Arc::new(SqlxTaskRepository::new(pool.clone()));
    let engine = Arc::new(Aria2Client::new(
        &config.aria2_rpc_url,
        config.aria2_secret.clone(),
        config.engine_timeout(),
    ));
    let cache = CacheStore::new(&config.cache_dir, &config.incomplete_marker_suffix)?;

    let manager = Arc::new(TaskManager::new(
        repo,
        engine,
        cache,
        config.headers.clone(),
    ));
    let upstream = UpstreamClient::new(header_map(&config.headers)?, config.playlist_timeout());
    let proxy = Arc::new(ProxyService::new(
        upstream,
        Arc::clone(&manager),
        config.default_proxy_base(),
    ));

    manager.report_unfinished().await;

    let state = AppState::new(proxy)
        .with_pool(pool.clone())
        .with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::with_state(ApiServerConfig::from_app_config(&config), state);

    let cancel_token = server.cancel_token();
    logging_config.start_retention_cleanup(cancel_token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            cancel_token.cancel();
        }
    });

    tracing::info!(
        cache_dir = %manager.cache().root().display(),
        aria2 = %config.aria2_rpc_url,
        "hls-accel initialized successfully"
    );

    let served = server.run().await;

    manager.shutdown().await;
    pool.close().await;

    served?;
    Ok(())
}
