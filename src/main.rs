//! Back-office e-commerce API server

use anyhow::Result;
use backoffice_ecommerce::{api, bus::EventBus, AppConfig};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = AppConfig::from_env()?;
    let db = PgPoolOptions::new().max_connections(config.max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let bus = EventBus::connect(config.nats_url.as_deref()).await;
    if config.stripe.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY not set, payment routes will answer 503");
    }

    let app = api::router(api::AppState::new(&config, db, bus));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("back-office API listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
