use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparrow_dispatch::{config::AppConfig, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sparrow_dispatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let address = config.bind_address();

    let app_state = AppState::new(config).await?;
    let app = create_router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("sparrow-dispatch listening on {}", address);
    axum::serve(listener, app).await?;

    Ok(())
}
