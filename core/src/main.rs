/// Quadmart chat service - main entry point
use quadmart_core::chat_api::{start_chat_api, ApiState};
use quadmart_core::{seed_demo, ChatService, Config, InMemoryDirectory, StaticTokens};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config =
        Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    std::fs::create_dir_all(&config.data_dir)?;

    // Stand-ins for the marketplace's listing/profile/auth services
    let directory = InMemoryDirectory::new();
    let tokens = StaticTokens::new();
    if config.seed_demo {
        seed_demo(&directory, &tokens).await;
    }

    let service = ChatService::new(&config.data_dir, Arc::new(directory), config.feed_capacity)
        .map_err(|e| anyhow::anyhow!("Startup error: {}", e))?;

    info!("🛒 Starting Quadmart chat service");
    info!("   API port: {}", config.api_port);
    info!("   Data dir: {:?}", config.data_dir);

    let state = ApiState {
        service,
        auth: Arc::new(tokens),
    };

    tokio::select! {
        res = start_chat_api(state, config.api_port) => {
            res.map_err(|e| anyhow::anyhow!("API error: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    Ok(())
}
