use anyhow::Context;
use exitflow::broker::{BrokerAdapter, HttpBroker};
use exitflow::pricefeed::{PriceFeed, StoredPriceFeed};
use exitflow::{api, config::Config, db::init_db, ExitRuntime, Repository, TimeMs};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));
    let broker: Arc<dyn BrokerAdapter> = Arc::new(HttpBroker::new(config.broker_api_url.clone()));
    let prices: Arc<dyn PriceFeed> = Arc::new(StoredPriceFeed::new(repo.clone()));

    let runtime = Arc::new(ExitRuntime::new(&config, repo.clone(), broker, prices));

    // A failed bootstrap leaves the loops to catch up; they run the same steps.
    if let Err(e) = runtime.bootstrap(TimeMs::now()).await {
        tracing::error!(error = %e, "Bootstrap failed, continuing with periodic reconciliation");
    }

    let shutdown = CancellationToken::new();
    let loops = runtime.spawn_loops(&config.intervals, &shutdown);

    let app = api::create_router(api::AppState::new(repo, runtime.admin.clone()));
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(account_id = %config.account_id, "Server listening on {}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            signal_token.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    futures::future::join_all(loops).await;
    tracing::info!("All loops stopped");
    Ok(())
}
