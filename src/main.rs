use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pileup::{
    Config,
    handlers::{AppState, create_router},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::from_config(&config)?;
    if state.is_empty() {
        tracing::warn!("No tracks configured; pass --reference, --bam, --vcf or --bigbed");
    }
    let app = create_router(state.clone(), config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting pileup server on {}", addr);
    tracing::info!("Tracks: {:?}", state.tracks);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
