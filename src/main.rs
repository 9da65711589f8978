use std::sync::Arc;

use anyhow::Context;
use rfi_review::config::ReviewConfig;
use rfi_review::error::ServerError;
use rfi_review::review::{ReviewService, review_routes};
use rfi_review::store::ItemStore;

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

    let config = ReviewConfig::from_env()?;

    eprintln!("📋 RFI Review v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", config.db_path.display());
    eprintln!("   Actions: http://0.0.0.0:{}/api/actions", config.port);
    eprintln!("   Messages: http://0.0.0.0:{}/api/messages", config.port);
    eprintln!("   Status: http://0.0.0.0:{}/api/status\n", config.port);

    let store = ItemStore::new_local(&config.db_path)
        .await
        .context("Failed to open item store")?;

    if let Some(seed) = &config.seed_file {
        store
            .seed_from_file(seed)
            .await
            .with_context(|| format!("Failed to seed items from {}", seed.display()))?;
    }

    let service = Arc::new(ReviewService::new(Arc::new(store), &config)?);
    let app = review_routes(service);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!(addr = %addr, "Review server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    Ok(())
}
