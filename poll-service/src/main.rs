use std::net::SocketAddr;
use std::time::Duration;

use poll_service::{config::Config, database::Database, routes::build_router, state::AppState};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Poll Service");

    let config = Config::from_env()?;
    info!(
        "Vote policy: {}, ledger write attempts: {}",
        config.vote_policy.as_str(),
        config.ledger_max_attempts
    );
    if config.auth_secret.is_none() {
        info!("AUTH_SECRET not set, token issuance disabled");
    }

    let db = Database::connect(&config.db_path, config.db_max_connections).await?;
    let port = config.port;
    let state = AppState::new(config, db);

    // Expired tokens are rejected on use; this only bounds memory
    let token_store = state.token_store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TOKEN_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = token_store.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired tokens", purged);
            }
        }
    });

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
