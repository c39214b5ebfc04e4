// §4.E Snapshot Streamer: a paginated historical read, delivered only to
// the requesting client, interleaved with whatever live events are
// already in flight on that client's outbound queue. Grounded on the
// teacher's cache-aside read path in `handlers.rs`, generalized from a
// single cached read into a sequential paginated session.
use crate::errors::AktuellError;
use crate::models::{ServerMessage, SnapshotOptions};
use crate::registry::Client;
use crate::store::{ChangeStreamSource, FindPage};
use std::sync::Arc;
use tracing::warn;

/// Runs one snapshot session to completion or failure. Spawned as its
/// own task per subscription so a concurrent `unsubscribe` can detach the
/// subscription without aborting an in-flight session (§9 Open Question
/// a).
pub async fn run(
    store: Arc<dyn ChangeStreamSource>,
    client: Arc<Client>,
    database: String,
    collection: String,
    options: SnapshotOptions,
) {
    if let Err(e) = run_inner(store, &client, &database, &collection, options).await {
        warn!(
            client_id = %client.id, database = %database, collection = %collection,
            error = %e, "snapshot session aborted"
        );
        let _ = client.enqueue(ServerMessage::Error {
            error: format!("snapshot failed: {e}"),
            error_code: None,
            request_id: None,
        });
    }
}

async fn run_inner(
    store: Arc<dyn ChangeStreamSource>,
    client: &Arc<Client>,
    database: &str,
    collection: &str,
    options: SnapshotOptions,
) -> Result<(), AktuellError> {
    let batch_size = options.batch_size.max(1);

    let total_matching = store
        .count(database, collection, options.snapshot_filter.clone())
        .await?;
    let total = total_matching.min(options.snapshot_limit);

    enqueue(client, ServerMessage::SnapshotStart)?;

    let mut delivered: u64 = 0;
    let mut batch_number: u64 = 0;
    let mut skip: u64 = 0;

    while delivered < total {
        let want = batch_size.min(total - delivered);
        let page = store
            .find(
                database,
                collection,
                options.snapshot_filter.clone(),
                FindPage {
                    skip,
                    limit: want,
                    sort: options.snapshot_sort.clone(),
                },
            )
            .await?;

        if page.is_empty() {
            break;
        }

        let got = page.len() as u64;
        delivered += got;
        batch_number += 1;
        skip += got;

        enqueue(
            client,
            ServerMessage::SnapshotBatch {
                data: page,
                batch_number,
                remaining: total.saturating_sub(delivered),
            },
        )?;

        if got < want {
            // Fewer rows than requested: treat the collection as exhausted.
            break;
        }
    }

    enqueue(client, ServerMessage::SnapshotEnd)?;
    Ok(())
}

fn enqueue(client: &Arc<Client>, msg: ServerMessage) -> Result<(), AktuellError> {
    client.enqueue(msg).map_err(|e| AktuellError::SnapshotAborted(e.to_string()))
}
