// Voucher Dashboard - Web Server
// REST API, file imports and streamed report generation

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use voucher_dashboard::api::{build_router, AppState};
use voucher_dashboard::{db, AppConfig};

const DEFAULT_LOG_FILTER: &str = "voucher_dashboard=info,tower_http=info,warn";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    println!("🌐 Voucher Dashboard - Web Server v{}", voucher_dashboard::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let conn = db::open_database(&config.database.path)?;
    println!("✓ Database opened: {}", config.database.path.display());

    let bind = config.server.bind.clone();
    let state = AppState::new(conn, config);
    if !state.llm.is_enabled() {
        tracing::warn!("OPENAI_API_KEY not set, report generation is disabled");
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;

    println!("\n🚀 Server running on http://{}", bind);
    println!("   API: http://{}/api/health", bind);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
