use duochat::{auth, config::Config, router, store::SqliteStore, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let config = Config::from_env()?;

    let store = SqliteStore::connect(&config.database_url).await?;
    store.migrate().await?;
    auth::seed_users(&store, &config.seed_users).await?;

    let state = AppState::new(store, config.store_timeout);
    let app = router(state, &config)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
