use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use wxcache::catalog::ResourceRegistry;
use wxcache::core::config::AppConfig;
use wxcache::core::shutdown::{ShutdownCoordinator, SHUTDOWN_TIMEOUT_SECS};
use wxcache::observability::metrics as obs_metrics;
use wxcache::retrieval::engine::RetrievalEngine;
use wxcache::storage::cleanup::{run_sweep_task, RetentionSweeper};
use wxcache::storage::memory::InMemoryBackend;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration (layered: default.toml → {env}.toml → env vars)
    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "wxcache starting");

    if config.observability.metrics_enabled {
        install_metrics(&config.observability.metrics_listen_addr);
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        eprintln!("PANIC: {info}\nBacktrace:\n{backtrace}");
        default_hook(info);
    }));

    let shutdown = ShutdownCoordinator::new();
    let registry = Arc::new(ResourceRegistry::from_config(&config.resources));
    info!(resources = registry.len(), "catalog seeded");

    // The storage server is reached through the RPC layer, which lives
    // outside this process; the in-memory backend stands in for it here.
    let backend = Arc::new(InMemoryBackend::new());
    let engine = Arc::new(RetrievalEngine::new(backend, registry.clone(), &config));

    match engine.init().await {
        Ok(report) => info!(
            loaded = report.loaded,
            skipped = report.skipped,
            deleted = report.deleted,
            root = %config.storage.root_dir.display(),
            "local cache rehydrated"
        ),
        Err(e) => {
            error!(error = %e, "failed to prepare local cache directories");
            return ExitCode::FAILURE;
        }
    }

    let sweeper = Arc::new(RetentionSweeper::new(
        engine.layout().clone(),
        registry.clone(),
        engine.locks(),
        config.retention.clone(),
    ));
    let interval = Duration::from_secs(config.retention.sweep_interval_secs);
    let sweep_task = tokio::spawn(run_sweep_task(sweeper, interval, shutdown.token()));

    shutdown.wait_for_signal_and_shutdown().await;
    engine.shutdown();

    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), sweep_task).await {
        Ok(Ok(())) => {
            info!("shutdown completed");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, "retention sweep task failed");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("shutdown timed out after {}s, forcing exit", SHUTDOWN_TIMEOUT_SECS);
            ExitCode::FAILURE
        }
    }
}

fn install_metrics(listen_addr: &str) {
    let addr = if listen_addr.is_empty() {
        None
    } else {
        match listen_addr.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(listen_addr, error = %e, "invalid metrics listen address, exporter disabled");
                None
            }
        }
    };
    match obs_metrics::install_prometheus_recorder(addr) {
        Ok(()) => {
            obs_metrics::describe_all_metrics();
            if let Some(addr) = addr {
                info!(%addr, "prometheus exporter listening");
            }
        }
        Err(e) => warn!(error = %e, "failed to install metrics recorder"),
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
