use anyhow::{Context, Result};
use clap::Parser;
use morph_kernel::KernelBuilder;
use morph_variation::ThemeCatalog;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod routes;

use crate::config::{Cli, LogFormat};
use crate::routes::{AppState, router};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let policy = cli.policy();
    let registry = cli.registry()?;
    let themes = ThemeCatalog::load_or_builtin(cli.themes.as_deref());
    let kernel = KernelBuilder::new()
        .registry(registry)
        .policy(policy)
        .themes(themes)
        .build();
    let policy = kernel.policy();
    info!(
        parallel_chunk = policy.parallel_chunk,
        chunk_pause_ms = u64::try_from(policy.pacing.base.as_millis()).unwrap_or(u64::MAX),
        max_iterations = policy.max_iterations,
        simulate = cli.simulate,
        "orchestration policy loaded"
    );

    let app = router(AppState { kernel });
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed binding {}", cli.listen))?;
    info!(listen = %cli.listen, "morph-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("morph-api stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and names the signal that stopped the server.
async fn shutdown_signal() {
    let received = tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => "ctrl-c",
            Err(error) => {
                tracing::warn!(%error, "ctrl-c listener unavailable; waiting on SIGTERM only");
                sigterm().await
            }
        },
        name = sigterm() => name,
    };
    info!(signal = received, "shutdown requested, draining connections");
}

#[cfg(unix)]
async fn sigterm() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
            "sigterm"
        }
        Err(error) => {
            tracing::warn!(%error, "SIGTERM listener unavailable");
            std::future::pending().await
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() -> &'static str {
    std::future::pending().await
}
