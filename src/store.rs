// §6 store collaborator: `openChangeCursor`, `find`, `count`. The core
// only ever talks to this trait, never to `mongodb::Client` directly, so
// the ingestor and snapshot streamer are testable with a hand-written
// fake in the spirit of the teacher having no mocking framework either.
use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType as MongoOperationType};
use mongodb::options::{FindOptions, FullDocumentType};
use mongodb::Client as MongoClient;

use crate::errors::{AktuellError, Result};
use crate::models::{ChangeEvent, OperationType, SourceTimestamp};

/// One page read, bounded by `skip`/`limit`, with an optional sort spec.
pub struct FindPage {
    pub skip: u64,
    pub limit: u64,
    pub sort: Option<serde_json::Value>,
}

/// An open change-stream cursor for one database, already filtered to
/// its collection whitelist by the implementation.
#[async_trait]
pub trait RawChangeCursor: Send {
    /// Blocks until the next change document is available, or returns
    /// `Ok(None)` on a clean end of stream, or `Err` on a fatal cursor
    /// error (§7 `StoreFatal`).
    async fn try_next(&mut self) -> Result<Option<ChangeEvent>>;
}

/// The document-store collaborator named in §6. Implementations own the
/// connection; the core only ever sees this trait.
#[async_trait]
pub trait ChangeStreamSource: Send + Sync {
    async fn open_change_cursor(
        &self,
        database: &str,
        collection_whitelist: &[String],
    ) -> Result<Box<dyn RawChangeCursor>>;

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Option<serde_json::Value>,
        page: FindPage,
    ) -> Result<Vec<serde_json::Value>>;

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: Option<serde_json::Value>,
    ) -> Result<u64>;
}

/// MongoDB-backed implementation, the only collaborator this core ships
/// with in production.
pub struct MongoStore {
    client: MongoClient,
}

impl MongoStore {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = MongoClient::with_uri_str(uri)
            .await
            .map_err(|e| AktuellError::StoreFatal(e.to_string()))?;
        Ok(Self { client })
    }
}

struct MongoChangeCursor {
    inner: mongodb::change_stream::ChangeStream<ChangeStreamEvent<Document>>,
    database: String,
}

#[async_trait]
impl RawChangeCursor for MongoChangeCursor {
    async fn try_next(&mut self) -> Result<Option<ChangeEvent>> {
        let next = self
            .inner
            .try_next()
            .await
            .map_err(|e| AktuellError::StoreFatal(e.to_string()))?;

        match next {
            Some(raw) => Ok(Some(convert_change_event(&self.database, raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChangeStreamSource for MongoStore {
    async fn open_change_cursor(
        &self,
        database: &str,
        collection_whitelist: &[String],
    ) -> Result<Box<dyn RawChangeCursor>> {
        let db = self.client.database(database);

        let mut pipeline = Vec::new();
        if !collection_whitelist.is_empty() {
            pipeline.push(doc! {
                "$match": { "ns.coll": { "$in": collection_whitelist.to_vec() } }
            });
        }

        let stream = db
            .watch()
            .pipeline(pipeline)
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|e| AktuellError::StoreFatal(e.to_string()))?;

        Ok(Box::new(MongoChangeCursor {
            inner: stream,
            database: database.to_string(),
        }))
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Option<serde_json::Value>,
        page: FindPage,
    ) -> Result<Vec<serde_json::Value>> {
        let coll = self.client.database(database).collection::<Document>(collection);
        let filter_doc = to_bson_document(filter)?;

        let mut opts = FindOptions::default();
        opts.skip = Some(page.skip);
        opts.limit = Some(page.limit as i64);
        if let Some(sort) = page.sort {
            opts.sort = Some(to_bson_document(Some(sort))?.unwrap_or_default());
        }

        let mut cursor = coll
            .find(filter_doc.unwrap_or_default())
            .with_options(opts)
            .await
            .map_err(|e| AktuellError::StoreTransient(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| AktuellError::StoreTransient(e.to_string()))?
        {
            out.push(bson::to_bson(&doc).and_then(|b| bson::from_bson(b)).map_err(|e| {
                AktuellError::StoreTransient(format!("document conversion failed: {e}"))
            })?);
        }
        Ok(out)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: Option<serde_json::Value>,
    ) -> Result<u64> {
        let coll = self.client.database(database).collection::<Document>(collection);
        let filter_doc = to_bson_document(filter)?.unwrap_or_default();
        coll.count_documents(filter_doc)
            .await
            .map_err(|e| AktuellError::StoreTransient(e.to_string()))
    }
}

fn to_bson_document(value: Option<serde_json::Value>) -> Result<Option<Document>> {
    match value {
        None => Ok(None),
        Some(v) => bson::to_document(&v)
            .map(Some)
            .map_err(|e| AktuellError::StoreTransient(format!("invalid filter: {e}"))),
    }
}

/// Field extraction per §6: maps a real change-stream document onto the
/// canonical `ChangeEvent` shape. `rename`/`drop` carry no document key or
/// full document, matching the prototype driver's `Option` fields for
/// those.
fn convert_change_event(database: &str, raw: ChangeStreamEvent<Document>) -> Result<ChangeEvent> {
    let operation = match raw.operation_type {
        MongoOperationType::Insert => OperationType::Insert,
        MongoOperationType::Update => OperationType::Update,
        MongoOperationType::Replace => OperationType::Replace,
        MongoOperationType::Delete => OperationType::Delete,
        MongoOperationType::Drop => OperationType::Drop,
        MongoOperationType::Rename => OperationType::Rename,
        MongoOperationType::Invalidate => {
            return Err(AktuellError::StoreFatal(
                "change stream invalidated".to_string(),
            ))
        }
        other => {
            return Err(AktuellError::StoreTransient(format!(
                "unsupported operation type: {other:?}"
            )))
        }
    };

    let collection = raw
        .ns
        .as_ref()
        .and_then(|ns| ns.coll.clone())
        .unwrap_or_default();

    let document_key = raw.document_key.map(|doc| {
        doc.into_iter()
            .map(|(k, v)| (k, bson_to_json(v)))
            .collect()
    });

    let full_document = raw.full_document.map(|d| bson_to_json(bson::Bson::Document(d)));

    let (updated_fields, removed_fields) = match raw.update_description {
        Some(desc) => (
            Some(bson_to_json(bson::Bson::Document(desc.updated_fields))),
            Some(desc.removed_fields),
        ),
        None => (None, None),
    };

    let timestamp = raw
        .cluster_time
        .map(|ts| SourceTimestamp {
            t: ts.time,
            i: ts.increment,
        })
        .unwrap_or(SourceTimestamp { t: 0, i: 0 });

    let id = bson::to_bson(&raw.id)
        .ok()
        .and_then(|b| b.as_document().map(|d| d.to_string()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(ChangeEvent {
        id,
        operation,
        database: database.to_string(),
        collection,
        document_key,
        full_document,
        updated_fields,
        removed_fields,
        timestamp,
        ingest_timestamp: chrono::Utc::now(),
    })
}

fn bson_to_json(value: bson::Bson) -> serde_json::Value {
    serde_json::to_value(value.into_relaxed_extjson()).unwrap_or(serde_json::Value::Null)
}
