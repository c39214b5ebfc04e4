// §4.H / §5 Lifecycle Coordinator: starts the Hub and one ingestor per
// configured database in dependency order, and tears them down in the
// reverse order on shutdown. Grounded on the teacher's task-spawning
// style in `main.rs`, generalized from a fire-and-forget background task
// into an explicit coordinator that owns shutdown ordering.
use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::connection::{ws_handler, OriginPolicy};
use crate::health::health_check;
use crate::hub::Hub;
use crate::ingestor::Ingestor;
use crate::store::ChangeStreamSource;
use crate::validator::Validator;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub struct LifecycleCoordinator {
    hub: Hub,
    ingestors: Arc<Mutex<HashMap<String, Ingestor>>>,
}

impl LifecycleCoordinator {
    /// Builds the Hub and one ingestor per whitelisted database, wires
    /// the axum router, and serves it until `shutdown` resolves.
    pub async fn run(
        config: AppConfig,
        store: Arc<dyn ChangeStreamSource>,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let databases = config.resolved_databases();
        let validator = Arc::new(Validator::new(databases.clone()));

        let hub = Hub::spawn();
        let ingestors: Arc<Mutex<HashMap<String, Ingestor>>> = Arc::new(Mutex::new(HashMap::new()));

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(16);
        for db_config in &databases {
            let ingestor = Ingestor::spawn(
                store.clone(),
                hub.clone(),
                db_config.clone(),
                fatal_tx.clone(),
            );
            ingestors.lock().await.insert(db_config.name.clone(), ingestor);
        }
        drop(fatal_tx);

        // Tears down just the failing ingestor on a fatal cursor error;
        // the rest of the system keeps running (§4.D step 5, §7).
        let fatal_ingestors = ingestors.clone();
        tokio::spawn(async move {
            while let Some(database) = fatal_rx.recv().await {
                error!(database = %database, "ingestor failed fatally, tearing it down");
                if let Some(ingestor) = fatal_ingestors.lock().await.remove(&database) {
                    ingestor.abort();
                }
            }
        });

        let state = AppState::new(hub.clone(), store, validator);

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_check))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(build_cors_layer());

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        info!(%addr, "server starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("accept loop stopped, tearing down ingestors");
        for (_, ingestor) in ingestors.lock().await.drain() {
            ingestor.abort();
        }

        info!("closing hub reactor and remaining client connections");
        hub.shutdown().await;

        Ok(())
    }
}

/// Builds the `/ws`/`/health` router's CORS layer from the same origin
/// policy `connection.rs` enforces on WebSocket upgrades (§4.G): in
/// production, only the configured `ALLOWED_ORIGINS` may receive
/// CORS-enabled responses; in development, any origin is allowed, matching
/// the permissive default the teacher ships.
fn build_cors_layer() -> CorsLayer {
    let policy = OriginPolicy::from_process_env();
    if !policy.production {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = policy
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring unparsable allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Resolves when the process receives a Ctrl+C or, on Unix, SIGTERM —
/// the signal-handling half of bootstrap named as out of core scope in
/// §1 but needed to drive the Lifecycle Coordinator's shutdown path.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
