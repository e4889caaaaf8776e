use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use courier_server::cache::{PresenceCache, RedisPresenceStore};
use courier_server::config::{generate_config_template, Config};
use courier_server::db::{self, SqliteDirectory};
use courier_server::state::AppState;
use courier_server::ws::ConnectionRegistry;
use courier_server::routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("courier server v{} starting", env!("CARGO_PKG_VERSION"));

    // Authoritative store (SQLite)
    let db = db::init_db(&config.data_dir)?;
    let directory = Arc::new(SqliteDirectory::new(db));

    // Presence cache (Redis), verified with a PING at startup
    let store = RedisPresenceStore::connect(&config.redis_url).await?;
    tracing::info!("connected to presence store at {}", config.redis_url);

    let cache = Arc::new(PresenceCache::new(
        Arc::new(store),
        directory.clone(),
        Duration::from_secs(config.cache_ttl_secs),
    ));

    let app_state = AppState {
        directory,
        cache,
        connections: ConnectionRegistry::new(),
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
