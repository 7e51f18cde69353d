use std::sync::Arc;

use anyhow::Context;

use unsub_engine::api;
use unsub_engine::config::{EngineConfig, ServerConfig};
use unsub_engine::store::{LibSqlBackend, StatusStore};
use unsub_engine::unsubscribe::{Orchestrator, ReqwestTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();
    let server = ServerConfig::from_env()?;
    let http_port = server.http_port;

    eprintln!("📭 unsub-engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/unsubscribe", http_port);
    eprintln!(
        "   Timeout: {:?}, max {} concurrent runs",
        config.request_timeout, config.max_concurrent_runs
    );

    // ── Database ─────────────────────────────────────────────────────────
    let backend = LibSqlBackend::new_local(&server.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", server.db_path.display()))?;
    let store: Arc<dyn StatusStore> = Arc::new(backend);
    eprintln!("   Database: {}", server.db_path.display());

    // ── Engine ───────────────────────────────────────────────────────────
    let transport = Arc::new(ReqwestTransport::new(&config).context("failed to build HTTP client")?);
    let orchestrator = Orchestrator::new(&config, store, transport);

    // ── HTTP API ─────────────────────────────────────────────────────────
    let app = api::routes(orchestrator);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
        .await
        .with_context(|| format!("failed to bind port {http_port}"))?;
    tracing::info!(port = http_port, "Unsubscribe API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
