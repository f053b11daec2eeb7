#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use origin_lib::config::{self, Config};
use origin_lib::library::IndexConfig;
use origin_lib::state::AppState;
use origin_lib::tunnel;

/// Backoff between reconnect attempts once the relay tunnel drops.
const TUNNEL_RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Load this origin's stable device id, persisting a freshly generated one
/// under the OS user-data directory the first time (spec.md §6: "a
/// device-id file under the OS user-data directory").
fn load_or_create_device_id() -> anyhow::Result<String> {
    let data_dir = dirs::data_dir()
        .map(|d| d.join("serato-bridge"))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&data_dir)?;
    let path = data_dir.join("device_id");

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let generated = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &generated)?;
    Ok(generated)
}

fn crates_root(config: &Config) -> PathBuf {
    config
        .serato_path
        .clone()
        .or_else(|| config.music_roots.first().cloned())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Subcrates")
}

/// Keep the tunnel connected, reconnecting with a fixed backoff whenever it
/// drops -- the WebSocket is the origin's only inbound path for mobile
/// traffic, so losing it silently would strand every connected device.
async fn run_tunnel(relay_url: String, device_id: String, state: AppState, router: axum::Router) {
    loop {
        tracing::info!(relay_url = %relay_url, device_id = %device_id, "connecting to relay");
        match tunnel::connect(
            &relay_url,
            device_id.clone(),
            state.index.clone(),
            router.clone(),
        )
        .await
        {
            Ok(handle) => {
                *state.tunnel.lock().unwrap() = Some(handle);
                tracing::info!("tunnel established");
                // `connect` hands back control once the read/write tasks are
                // spawned; there's nothing further to await here but the
                // tasks dying, which we don't have a direct signal for from
                // this handle, so we poll liveness by re-registering on a
                // steady cadence instead of busy-looping a dead connection.
                tokio::time::sleep(TUNNEL_RECONNECT_DELAY * 12).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "relay connection failed, retrying");
                tokio::time::sleep(TUNNEL_RECONNECT_DELAY).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config::load();

    if config.music_roots.iter().all(|root| !root.is_dir()) {
        anyhow::bail!(
            "none of the configured music roots exist: {:?} (origin::error::OriginError::LibraryRootMissing)",
            config.music_roots
        );
    }

    let crates_root = crates_root(&config);
    tokio::fs::create_dir_all(&crates_root).await.ok();

    let state = AppState::new(&config, crates_root);

    let index_config = IndexConfig {
        roots: config.music_roots.clone(),
        database_path: config
            .serato_path
            .clone()
            .map(|root| root.join(origin_lib::db::DATABASE_FILENAME)),
        concurrency: 100,
        resolver_strict: config.resolver_strict,
    };
    {
        let index = state.index.clone();
        tokio::spawn(async move { index.parse_library(index_config).await });
    }

    let router = origin_lib::http::router(state.clone()).merge(origin_lib::ws_audio::router(state.clone()));

    if let Some(relay_url) = config.relay_url.clone() {
        let device_id = load_or_create_device_id()?;
        tokio::spawn(run_tunnel(relay_url, device_id, state, router.clone()));
    } else {
        tracing::info!("no relay configured (RELAY_URL unset); serving HTTP only");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "origin listening");

    axum::serve(listener, router).await?;

    Ok(())
}
