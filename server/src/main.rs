mod auth;
mod config;
mod persistence;
mod service;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tempo_proto::tempo_service_server::TempoServiceServer;
use tonic::transport::Server;

use service::TempoServiceImpl;
use session::{SessionManager, SessionSettings};

#[derive(Parser)]
#[command(name = "tempo-server", about = "Authoritative live chess session server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "[::1]:50051")]
    listen: std::net::SocketAddr,

    /// Data directory override (defaults to TEMPO_DATA_DIR / ~/.config/tempo/data).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with span durations
    use tracing_subscriber::fmt::format::FmtSpan;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let args = Args::parse();

    tracing::info!("Starting tempo gRPC server");

    let data_dir = args.data_dir.unwrap_or_else(config::get_data_dir);
    tracing::info!("Using data directory: {}", data_dir.display());

    let database = persistence::Database::open(&data_dir.join("tempo.db")).await?;
    let store = persistence::SqliteStore::new(database.pool().clone());

    let manager = Arc::new(SessionManager::new(
        store.clone(),
        SessionSettings::default(),
    ));
    let tokens = auth::TokenKeys::new(&config::get_token_secret());
    let service = TempoServiceImpl::new(manager, store, tokens);

    tracing::info!("Server listening on {}", args.listen);

    Server::builder()
        .add_service(TempoServiceServer::new(service))
        .serve(args.listen)
        .await?;

    Ok(())
}
