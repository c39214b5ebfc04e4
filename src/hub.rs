// §4.C Hub: process-wide registry of connected clients, single reactor
// task serializing register/unregister/broadcast. Grounded on the
// teacher's single `Broker` owning all cross-client state, generalized
// from a SQLite-backed subscription cache to an in-memory `clients` map
// per §4.C/§9 ("treat the Hub as a service owned by the Lifecycle
// Coordinator, not a language-level global").
use crate::models::{ChangeEvent, ServerMessage};
use crate::registry::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum HubCommand {
    Register(Arc<Client>),
    Unregister(String),
    Broadcast(ChangeEvent),
    Shutdown,
}

/// Handle shared by every task that needs to talk to the Hub. Cloning is
/// cheap; the reactor task is the only owner of `clients`.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns the reactor task and returns a handle to it.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<HubCommand>(4096);

        tokio::spawn(async move {
            let mut clients: HashMap<String, Arc<Client>> = HashMap::new();

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    HubCommand::Register(client) => {
                        info!(client_id = %client.id, "client registered");
                        clients.insert(client.id.clone(), client);
                    }
                    HubCommand::Unregister(id) => {
                        if let Some(client) = clients.remove(&id) {
                            info!(client_id = %id, "client unregistered");
                            client.close();
                        }
                    }
                    HubCommand::Broadcast(event) => {
                        let mut evicted = Vec::new();
                        for client in clients.values() {
                            if client.matches(&event.database, &event.collection).await {
                                let msg = ServerMessage::Change {
                                    change: event.clone(),
                                };
                                if client.enqueue(msg).is_err() {
                                    warn!(
                                        client_id = %client.id,
                                        "outbound queue overflow, evicting slow client"
                                    );
                                    evicted.push(client.id.clone());
                                }
                            }
                        }
                        for id in evicted {
                            if let Some(client) = clients.remove(&id) {
                                client.close();
                            }
                        }
                    }
                    HubCommand::Shutdown => {
                        info!(client_count = clients.len(), "hub shutting down, closing clients");
                        for (_, client) in clients.drain() {
                            client.close();
                        }
                        break;
                    }
                }
            }

            debug!("hub reactor exiting");
        });

        Self { tx }
    }

    pub async fn register(&self, client: Arc<Client>) {
        let _ = self.tx.send(HubCommand::Register(client)).await;
    }

    pub async fn unregister(&self, client_id: String) {
        let _ = self.tx.send(HubCommand::Unregister(client_id)).await;
    }

    /// Pushed into the Hub's single serialized channel; because each
    /// ingestor feeds its own stream into this channel sequentially, and
    /// the reactor drains it serially, per-client per-database ordering
    /// is preserved (§4.C).
    pub async fn broadcast(&self, event: ChangeEvent) {
        let _ = self.tx.send(HubCommand::Broadcast(event)).await;
    }

    /// Closes every registered client's outbound signal (waking its
    /// writer loop, which the reader loop then follows) and stops the
    /// reactor task — §5 stop order step 3.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationType, SourceTimestamp};
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    fn sample_event(database: &str, collection: &str) -> ChangeEvent {
        ChangeEvent {
            id: "e1".into(),
            operation: OperationType::Insert,
            database: database.into(),
            collection: collection.into(),
            document_key: Some(StdHashMap::new()),
            full_document: None,
            updated_fields: None,
            removed_fields: None,
            timestamp: SourceTimestamp { t: 1, i: 1 },
            ingest_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_only_to_matching_clients() {
        let hub = Hub::spawn();
        let (client_a, mut rx_a) = Client::new("a".into());
        let client_a = Arc::new(client_a);
        client_a
            .add_subscription(
                &crate::validator::Validator::new(vec![crate::models::DatabaseConfig {
                    name: "db".into(),
                    collections: vec![],
                }]),
                "db".into(),
                "coll".into(),
            )
            .await
            .unwrap();

        let (client_b, mut rx_b) = Client::new("b".into());
        let client_b = Arc::new(client_b);

        hub.register(client_a.clone()).await;
        hub.register(client_b.clone()).await;
        hub.broadcast(sample_event("db", "coll")).await;

        let got = tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .expect("client a should receive")
            .unwrap();
        assert!(matches!(got, ServerMessage::Change { .. }));

        let nothing = tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await;
        assert!(nothing.is_err(), "client b should not receive unmatched event");
    }

    #[tokio::test]
    async fn unregister_closes_the_client() {
        let hub = Hub::spawn();
        let (client, _rx) = Client::new("c1".into());
        let client = Arc::new(client);
        hub.register(client.clone()).await;
        hub.unregister("c1".into()).await;

        // Give the reactor a tick to process the unregister command.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn shutdown_closes_every_registered_client() {
        let hub = Hub::spawn();
        let (client_a, _rx_a) = Client::new("a".into());
        let client_a = Arc::new(client_a);
        let (client_b, _rx_b) = Client::new("b".into());
        let client_b = Arc::new(client_b);

        hub.register(client_a.clone()).await;
        hub.register(client_b.clone()).await;
        hub.shutdown().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client_a.is_closed());
        assert!(client_b.is_closed());
    }
}
