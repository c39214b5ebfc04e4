// §4.B Subscription Registry + §3 Client: the set of subscriptions for
// one connected client, plus its bounded outbound queue. A client's
// subscriptions are protected by a reader/writer lock (multiple
// concurrent `matches` calls from the Hub's broadcast path, one writer at
// a time for subscribe/unsubscribe), grounded on the teacher's
// `Arc<RwLock<HashMap<...>>>` pattern in `app_state.rs`/`broker.rs`.
use crate::errors::{AktuellError, Result};
use crate::models::{DatabaseConfig, ServerMessage, Subscription};
use crate::validator::Validator;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

/// Outbound queue capacity; §3 requires at least 1024.
pub const OUTBOUND_CAPACITY: usize = 1024;

pub struct Client {
    pub id: String,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    outbound_tx: mpsc::Sender<ServerMessage>,
    closed: AtomicBool,
    /// Fired once on `close()` so the writer/reader loops, which are
    /// otherwise parked on a channel receive or a transport read, can
    /// wake up and exit promptly.
    pub closed_notify: Notify,
}

impl Client {
    /// Builds a new client and its outbound receiver half. The receiver
    /// is handed to the writer loop, which is the outbound queue's sole
    /// reader.
    pub fn new(id: String) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            Self {
                id,
                subscriptions: RwLock::new(HashMap::new()),
                outbound_tx: tx,
                closed: AtomicBool::new(false),
                closed_notify: Notify::new(),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent: repeated calls after the first are no-ops; only the
    /// call that flips the flag notifies waiters.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.closed_notify.notify_waiters();
        }
    }

    /// Validates `(db, coll)` against `validator` first; on success
    /// constructs and stores a `Subscription` with a freshly generated
    /// id.
    pub async fn add_subscription(
        &self,
        validator: &Validator,
        database: String,
        collection: String,
    ) -> Result<Subscription> {
        if !validator.is_allowed(&database, &collection) {
            return Err(AktuellError::InvalidSubscription);
        }

        let sub = Subscription {
            id: Uuid::new_v4().to_string(),
            client_id: self.id.clone(),
            database,
            collection,
            created_at: Utc::now(),
        };

        let mut subs = self.subscriptions.write().await;
        subs.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    pub async fn remove_subscription(&self, id: &str) -> Result<()> {
        let mut subs = self.subscriptions.write().await;
        if subs.remove(id).is_some() {
            Ok(())
        } else {
            Err(AktuellError::NotFoundSubscription)
        }
    }

    pub async fn remove_all(&self) {
        let mut subs = self.subscriptions.write().await;
        subs.clear();
    }

    pub async fn matches(&self, database: &str, collection: &str) -> bool {
        let subs = self.subscriptions.read().await;
        subs.values().any(|s| s.matches(database, collection))
    }

    /// Non-blocking push to the outbound queue. Returns `QueueOverflow`
    /// when the queue is full or the client already closed.
    pub fn enqueue(&self, msg: ServerMessage) -> Result<()> {
        if self.is_closed() {
            return Err(AktuellError::TransportClosed);
        }
        self.outbound_tx
            .try_send(msg)
            .map_err(|_| AktuellError::QueueOverflow)
    }
}

/// Helper for request handlers that need to validate a `(db, coll)` pair
/// against a `DatabaseConfig` whitelist directly (used by tests only —
/// production code always goes through `Validator`).
#[cfg(test)]
pub fn test_validator(cfgs: Vec<DatabaseConfig>) -> Validator {
    Validator::new(cfgs)
}
