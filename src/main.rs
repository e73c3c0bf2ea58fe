use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostelpass::config::Config;
use hostelpass::engine::spawn_leave_activator;
use hostelpass::{db::DbPool, AppState};

#[derive(Parser, Debug)]
#[command(name = "hostelpass")]
#[command(author, version, about = "Hostel phone, gate pass and discipline tracker", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hostelpass.toml", env = "HOSTELPASS_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting hostelpass v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    hostelpass::utils::ensure_dir(&config.server.data_dir)?;

    // Initialize database
    let db = hostelpass::db::init(&config.server.data_dir).await?;

    // Ensure a bootstrap admin user exists
    hostelpass::api::auth::ensure_admin_user(
        &db,
        &config.auth.admin_username,
        &config.auth.admin_password,
    )
    .await?;

    let state = Arc::new(AppState::new(config.clone(), db.clone()));

    // Background work
    spawn_leave_activator(db.clone(), config.leave.clone(), state.last_leave_run.clone());
    hostelpass::api::rate_limit::spawn_cleanup_task(state.rate_limiter.clone());
    spawn_session_cleanup(db);

    let mut app = hostelpass::api::create_router(state);

    // Serve the single page app, falling back to index.html for client routes
    if let Some(static_dir) = &config.server.static_dir {
        let index_file = static_dir.join("index.html");
        let serve_static = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));
        app = app.fallback_service(serve_static);
        tracing::info!(dir = %static_dir.display(), "Serving static files");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Admin token: {}", config.auth.admin_token);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Drop expired login sessions once an hour
fn spawn_session_cleanup(db: DbPool) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match hostelpass::api::auth::purge_expired_sessions(&db).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
