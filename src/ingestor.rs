// §4.D Change-Stream Ingestor: one cursor per configured database,
// parse + forward. Two tasks per database — a reader that drains the
// store cursor into a small internal channel, and a forwarder that reads
// that channel and calls `hub.broadcast` — mirroring the teacher's
// split between a dedicated DB-write worker and the request path in
// `broker.rs`.
use crate::errors::AktuellError;
use crate::hub::Hub;
use crate::models::DatabaseConfig;
use crate::store::ChangeStreamSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Internal channel capacity between the cursor reader and the
/// broadcast forwarder (§4.D step 2).
const INTERNAL_CHANNEL_CAPACITY: usize = 100;

pub struct Ingestor {
    pub database: String,
    reader: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Ingestor {
    /// Opens the cursor and spawns the reader/forwarder pair. `on_fatal`
    /// is called (once) if the cursor dies with an unrecoverable error,
    /// so the Lifecycle Coordinator can note that this database produces
    /// no further events until restart, without affecting other
    /// ingestors.
    pub fn spawn(
        store: Arc<dyn ChangeStreamSource>,
        hub: Hub,
        config: DatabaseConfig,
        on_fatal: mpsc::Sender<String>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let database = config.name.clone();

        let reader = {
            let database = database.clone();
            let whitelist = config.collections.clone();
            tokio::spawn(async move {
                let mut cursor = match store.open_change_cursor(&database, &whitelist).await {
                    Ok(cursor) => cursor,
                    Err(e) => {
                        error!(database = %database, error = %e, "failed to open change cursor");
                        let _ = on_fatal.send(database.clone()).await;
                        return;
                    }
                };

                loop {
                    match cursor.try_next().await {
                        Ok(Some(event)) => {
                            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
                                warn!(
                                    database = %database,
                                    "internal ingest channel full, dropping event"
                                );
                            }
                        }
                        Ok(None) => {
                            info!(database = %database, "change cursor exhausted");
                            break;
                        }
                        Err(AktuellError::StoreFatal(msg)) => {
                            error!(database = %database, error = %msg, "change cursor failed fatally");
                            let _ = on_fatal.send(database.clone()).await;
                            break;
                        }
                        Err(e) => {
                            warn!(database = %database, error = %e, "transient cursor error");
                        }
                    }
                }
            })
        };

        let forwarder = {
            let hub = hub.clone();
            let mut rx = rx;
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    hub.broadcast(event).await;
                }
            })
        };

        Self {
            database,
            reader,
            forwarder,
        }
    }

    /// Aborts both tasks; used by the Lifecycle Coordinator on shutdown
    /// or when a fatal error is reported for this database.
    pub fn abort(&self) {
        self.reader.abort();
        self.forwarder.abort();
    }
}
