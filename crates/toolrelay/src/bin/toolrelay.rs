//! Run the tool relay server.
//!
//! Usage: `cargo run --bin toolrelay`

use tracing_subscriber::EnvFilter;

use toolrelay::config::RelayConfig;
use toolrelay::context::RelayContext;
use toolrelay::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolrelay=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RelayConfig::load()?;
    tracing::info!(
        bind = %config.bind,
        port = config.port,
        execution_timeout_ms = config.execution_timeout_ms,
        history_capacity = config.history_capacity,
        "starting tool relay"
    );

    let context = RelayContext::new(config)?;
    let mut server = Server::new(context).await?;
    tracing::info!("endpoints: GET /health, GET /tools, GET /tools/status, POST /tools/{{name}}/call, GET /ws");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown()?;
    server.wait().await;
    Ok(())
}
