use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use unigate_common::{GatewayPatch, GatewaySnapshot};
use unigate_core::{
    Authenticator, Dispatcher, GatewayState, Metrics, RateLimiter, Validator, WreqClient,
};
use unigate_provider::{ProviderRegistry, StaticTokenProvider};
use unigate_router::{build_router, AppContext, CorsPolicy};
use unigate_storage::MemoryRepository;

mod sink;

/// Exit codes: 0 clean shutdown, 1 invalid config, 2 bind failure,
/// 3 storage init failure.
const EXIT_CONFIG: i32 = 1;
const EXIT_BIND: i32 = 2;
#[allow(dead_code)]
const EXIT_STORAGE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "unigate", about = "Self-hosted OpenAI-compatible AI gateway")]
struct Cli {
    /// Path to the JSON config snapshot.
    #[arg(long, env = "CONFIG_PATH", default_value = "unigate.json")]
    config: PathBuf,
    /// Seeds an extra management API key.
    #[arg(long, env = "MANAGEMENT_PASSWORD", hide_env_values = true)]
    management_password: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let snapshot = match load_snapshot(&cli.config, cli.management_password.clone()) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::error!(path = %cli.config.display(), error = %err, "config invalid");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let repository = Arc::new(MemoryRepository::new());
    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(err) => {
            tracing::error!(error = %err, "metrics registry init failed");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let usage_sink: Arc<dyn unigate_provider::UsageSink> =
        Arc::new(sink::RepositoryUsageSink::new(repository.clone()));
    let state = Arc::new(GatewayState::new(snapshot.clone(), vec![usage_sink]));

    // Transport-level idle bound for streams; the dispatcher's pump applies
    // the keep-alive-aware watchdog on top.
    let upstream = Arc::new(WreqClient::new(
        Duration::from_secs(5),
        Duration::from_secs(300),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        state.clone(),
        Arc::new(ProviderRegistry::with_builtin()),
        upstream,
        Arc::new(StaticTokenProvider::default()),
        metrics.clone(),
    ));

    let limiter = Arc::new(RateLimiter::new(
        snapshot.rate_limit.requests_per_minute,
        Duration::from_secs(snapshot.rate_limit.cleanup_interval),
    ));
    limiter.start_sweeper();

    let grid = unigate_grid::grid_router(&snapshot.grid, metrics.grid_cache.clone());
    let grid_runtime = grid.as_ref().map(|(_, runtime)| runtime.clone());
    if let Some(runtime) = &grid_runtime {
        runtime.cache.start_sweeper();
    }

    let authenticator = Arc::new(Authenticator::new(&snapshot.auth));
    let revocation_pruner = {
        let authenticator = authenticator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(600));
            loop {
                ticker.tick().await;
                authenticator.prune_revoked();
            }
        })
    };

    let ctx = AppContext {
        dispatcher,
        authenticator,
        limiter: limiter.clone(),
        validator: Arc::new(Validator::new(snapshot.limits.clone())),
        metrics: metrics.clone(),
        cors: Arc::new(CorsPolicy::new(snapshot.cors.allowed_origins.clone())),
    };
    let app = build_router(ctx, grid.map(|(router, _)| router));

    let bind = format!("{}:{}", snapshot.server.host, snapshot.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%bind, error = %err, "bind failed");
            std::process::exit(EXIT_BIND);
        }
    };
    tracing::info!(%bind, "listening");

    spawn_reload_task(state.clone(), cli.config.clone(), cli.management_password);

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "server error");
    }

    // Supervisor teardown: background tasks do not outlive the listener.
    limiter.stop_sweeper();
    revocation_pruner.abort();
    if let Some(runtime) = &grid_runtime {
        runtime.cache.stop_sweeper();
    }
    tracing::info!("shutdown complete");
}

fn load_snapshot(
    path: &Path,
    management_password: Option<String>,
) -> anyhow::Result<GatewaySnapshot> {
    let mut snapshot = if path.exists() {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw)?
    } else {
        tracing::warn!(path = %path.display(), "config file missing; starting with defaults");
        GatewaySnapshot::default()
    };
    GatewayPatch {
        host: None,
        port: None,
        management_password,
    }
    .apply(&mut snapshot);
    Ok(snapshot)
}

/// SIGHUP rebuilds the snapshot from disk and swaps it in atomically;
/// in-flight requests finish on the snapshot they started with.
fn spawn_reload_task(
    state: Arc<GatewayState>,
    config_path: PathBuf,
    management_password: Option<String>,
) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let Ok(mut hangup) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            tracing::warn!("SIGHUP handler unavailable; hot reload disabled");
            return;
        };
        while hangup.recv().await.is_some() {
            match load_snapshot(&config_path, management_password.clone()) {
                Ok(snapshot) => {
                    state.reload(snapshot);
                }
                Err(err) => {
                    tracing::error!(error = %err, "reload failed; keeping active snapshot");
                }
            }
        }
    });
    #[cfg(not(unix))]
    let _ = (state, config_path, management_password);
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    tracing::info!("shutdown signal received");
}
