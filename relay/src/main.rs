#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

use relay_lib::config;
use relay_lib::state::AppState;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config::load();
    let state = AppState::new();

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "relay listening");

    let router = relay_lib::router(state);
    axum::serve(listener, router).await?;

    Ok(())
}
