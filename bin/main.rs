use anyhow::{Context, Result};
use chrono::Local;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use xrelay::api::{self, AppState};
use xrelay::config::ConfigManager;
use xrelay::health::{CapacityCheck, HealthChecker, SessionFailureCheck, UploadStoreCheck};
use xrelay::rtmp::RtmpConnector;
use xrelay::{Destination, IngestManager, Registry, SessionRuntime, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::new()?;

    let env = env_logger::Env::default().filter_or(
        env_logger::DEFAULT_FILTER_ENV,
        &manager.get_settings().log_level,
    );
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                &record.args()
            )
        })
        .init();

    match manager.source() {
        Some(path) => log::info!("Using config file: {}", path.display()),
        None => log::warn!("No config file found, using defaults and environment variables only"),
    }
    let config = manager.into_settings();

    let destination = Destination::parse(&config.ingest.url)
        .with_context(|| format!("invalid ingest url '{}'", config.ingest.url))?;
    let store = Store::open(&config.ingest.temp_dir)
        .await
        .with_context(|| format!("cannot open upload directory '{}'", config.ingest.temp_dir))?;

    let runtime = SessionRuntime {
        connector: Arc::new(RtmpConnector::new(Duration::from_secs(
            config.session.connect_timeout_secs,
        ))),
        retry: config.retry_policy(),
        grace_period: Duration::from_secs(config.session.grace_period_secs),
        watchdog: Duration::from_secs(config.session.watchdog_secs),
    };
    let registry = Arc::new(Registry::new(config.registry_config(), runtime, store.clone()));
    let cleanup = registry.start_cleanup_task(Duration::from_secs(config.session.sweep_interval_secs));
    let ingest = Arc::new(IngestManager::new(
        registry.clone(),
        store.clone(),
        destination.clone(),
        config.ingest.max_file_size,
    ));

    let health = HealthChecker::new()
        .add_check(Box::new(CapacityCheck::new(registry.clone())))
        .add_check(Box::new(UploadStoreCheck::new(store.root().to_path_buf())))
        .add_check(Box::new(SessionFailureCheck::new(0.5)));

    let app = api::router(AppState {
        ingest,
        registry: registry.clone(),
        health: Arc::new(health),
    });

    let addr = format!("0.0.0.0:{}", config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!(
        "Relaying to {} with up to {} sessions, API listening on {}",
        destination,
        registry.max_concurrent(),
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
            }
            log::info!("Shutting down");
        })
        .await?;

    cleanup.abort();
    // sessions abort stuck pipelines once the grace period is over
    let deadline = Duration::from_secs(config.session.grace_period_secs + 1);
    let remaining = registry.stop_all(deadline).await;
    if remaining > 0 {
        log::error!("Exiting with {} sessions still active", remaining);
    }
    Ok(())
}
