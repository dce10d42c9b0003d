use classrecord::api::router;
use classrecord::config::AppConfig;
use classrecord::state::{AppState, Backend};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "classrecord=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::new_from_env()?;

    let backend = Backend::connect(&config).await;
    if let Backend::Ready(store) = &backend {
        match store.ensure_defaults().await {
            Ok(changed) => info!("metadata checked (changed: {})", changed),
            Err(e) => warn!("ensure_defaults failed at startup: {}", e),
        }
    }

    let app = router(AppState::new(backend));

    info!("listening on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
