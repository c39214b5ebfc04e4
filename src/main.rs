// Process bootstrap: load configuration, connect to the store, hand off
// to the Lifecycle Coordinator. Kept thin, the way the teacher's
// `#[tokio::main]` entry point is thin.
use aktuell::config::AppConfig;
use aktuell::lifecycle::{self, LifecycleCoordinator};
use aktuell::store::{ChangeStreamSource, MongoStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    tracing::info!("connecting to store");
    let store: Arc<dyn ChangeStreamSource> =
        Arc::new(MongoStore::connect(&config.mongodb.uri).await?);

    LifecycleCoordinator::run(config, store, lifecycle::shutdown_signal()).await
}
