//! Identity broker server binary

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use identity_broker::broker::IdentityBroker;
use identity_broker::config::AppConfig;
use identity_broker::provider::{Gateway, ProviderGateway, ProviderSettings};
use identity_broker::store::PgStore;
use identity_broker::web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identity_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    let cognito = ProviderGateway::new(ProviderSettings::cognito(&config.cognito))?;
    let auth0 = ProviderGateway::new(ProviderSettings::auth0(&config.auth0))?;
    let gateways: Vec<Arc<dyn Gateway>> = vec![Arc::new(cognito), Arc::new(auth0)];

    let broker = Arc::new(IdentityBroker::new(store, &config.jwt, gateways)?);
    let config = Arc::new(config);

    let app = web::router(broker, Arc::clone(&config));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "identity broker listening");
    axum::serve(listener, app).await?;

    Ok(())
}
