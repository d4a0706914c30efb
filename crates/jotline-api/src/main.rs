use std::sync::Arc;

use jotline_api::{app_router, ApiConfig, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jotline_api=info".parse()?),
        )
        .init();

    let config = Arc::new(ApiConfig::from_env()?);
    tracing::info!("Starting jotline-api with config: {:?}", config);

    let state = AppState::from_config(config)?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("jotline-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
