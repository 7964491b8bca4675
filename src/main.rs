use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use request_limiter::config::AppConfig;
use request_limiter::error::RateLimiterError;
use request_limiter::{init_logging, server, storage, RateLimiter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Rate limiter starting up");

    let config = AppConfig::from_env()?;

    // Serving without a working backend would leave limits unenforced
    let storage = match storage::connect(&config).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return Err(e.into());
        }
    };

    info!(
        requests = config.limits.ip.requests,
        window = ?config.limits.ip.window,
        block = ?config.limits.ip.block_duration,
        "IP rate limit"
    );
    info!(
        requests = config.limits.token.requests,
        window = ?config.limits.token.window,
        block = ?config.limits.token.block_duration,
        "Default token rate limit"
    );
    if !config.limits.tokens.is_empty() {
        info!("Custom token limits configured for {} tokens", config.limits.tokens.len());
    }

    let limiter = Arc::new(RateLimiter::new(storage, config.limits.clone()));
    let app = server::router(Arc::clone(&limiter), config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RateLimiterError::Internal(format!("failed to bind {}: {}", addr, e)))?;
    info!("Server listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    limiter.close().await?;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(RateLimiterError::Internal(e.to_string()).into());
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}
