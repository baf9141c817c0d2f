use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use captain_dispatch::{
    RideResult,
    routes::create_router,
    state::{AppConfig, AppState},
};

#[tokio::main]
async fn main() -> RideResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let app_state = Arc::new(AppState::new(config).await?);

    // Event channels are created on first subscribe; drop the ones nobody listens to anymore.
    let notifier = app_state.notifier.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            notifier.prune().await;
        }
    });

    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| captain_dispatch::RideError::InvalidConfiguration(format!("cannot bind {}: {}", bind_addr, e)))?;
    tracing::info!("Dispatch service listening on {}", bind_addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| captain_dispatch::RideError::InternalServer(e.to_string()))?;
    Ok(())
}
