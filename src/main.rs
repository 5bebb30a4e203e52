use std::sync::Arc;

use poem::listener::TcpListener;
use tracing_subscriber::EnvFilter;

use blogpost_api::{AppState, build_app, config::Config, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(auth = ?config.auth, query_timeout = ?config.database.query_timeout, "configuration loaded");

    let storage = storage::Storage::connect(&config.database).await?;
    storage::sync_schema(&storage).await?;

    let state = Arc::new(AppState::new(storage, &config.auth));
    let app = build_app(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, "server starting");
    poem::Server::new(TcpListener::bind(addr)).run(app).await?;
    Ok(())
}
