use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use parlor_core::provider::ChatProvider;
use parlor_llm::HttpProvider;
use parlor_room::RoomManager;

#[derive(Parser)]
#[command(name = "parlor", about = "Real-time chat room coordinator")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 9300)]
    port: u16,

    /// Directory holding one database file per room
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Starting parlor server");

    let data_dir = args.data_dir.unwrap_or_else(|| {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(".parlor")
            .join("rooms")
    });
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
    tracing::info!(path = %data_dir.display(), "Room databases");

    let endpoint =
        std::env::var("PARLOR_PROVIDER_URL").expect("PARLOR_PROVIDER_URL must be set");
    let api_key = SecretString::from(
        std::env::var("PARLOR_PROVIDER_KEY").expect("PARLOR_PROVIDER_KEY must be set"),
    );
    let provider: Arc<dyn ChatProvider> = Arc::new(
        HttpProvider::new(endpoint, api_key).expect("Failed to build provider client"),
    );

    let rooms = Arc::new(RoomManager::new(Some(data_dir), Arc::clone(&provider)));

    let config = parlor_server::ServerConfig { port: args.port };
    let handle = parlor_server::start(config, rooms, provider)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "parlor server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
