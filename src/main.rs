use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use snip::api::create_api_router;
use snip::auth::AuthService;
use snip::config::Config;
use snip::service::Shortener;
use snip::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage = storage::connect(&config.storage).await?;
    info!("Storage initialized successfully");

    let shortener = Arc::new(Shortener::new(
        storage,
        config.base_url.clone(),
        config.deletion_workers,
        config.deletion_queue_capacity,
    ));
    let auth_service = Arc::new(AuthService::new(config.auth_secret.as_deref()));

    match &config.trusted_subnet {
        Some(subnet) => info!("Internal stats open to {}", subnet),
        None => info!("Internal stats disabled (no trusted subnet)"),
    }

    let router = create_api_router(
        Arc::clone(&shortener),
        auth_service,
        config.trusted_subnet,
    );

    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    info!("🚀 Server listening on http://{}", config.server_address);
    info!("   - Short links served under {}", config.base_url);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, draining deletion queue...");
    shortener.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
}
