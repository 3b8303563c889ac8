//! MongoDB backend

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{ErrorKind, WriteConcernError, WriteFailure as MongoWriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, instrument};

use super::{
    redact_uri, Document, DocumentStore, FieldStats, Filter, IndexOutcome, IndexSpec,
    InsertOutcome, StoreError, StoreTarget, WriteFailure,
};

/// Server error code for an equivalent index that is already there
const INDEX_ALREADY_EXISTS: i32 = 68;

const APP_NAME: &str = "catalog-ingest";

/// A single MongoDB collection
pub struct MongoStore {
    client: Client,
    collection: Collection<bson::Document>,
}

impl MongoStore {
    /// Build a client for the target; the driver connects lazily on first use
    #[instrument(skip(target), fields(uri = %redact_uri(&target.uri), database = %target.database))]
    pub async fn open(target: &StoreTarget) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&target.uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        options.connect_timeout = Some(target.connect_timeout);
        options.server_selection_timeout = Some(target.connect_timeout);
        options.app_name = Some(APP_NAME.to_string());

        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;
        let collection = client
            .database(&target.database)
            .collection::<bson::Document>(&target.collection);

        debug!(collection = %target.collection, "MongoDB client configured");
        Ok(Self { client, collection })
    }

    fn to_bson(doc: Document) -> Result<bson::Document, StoreError> {
        bson::to_document(&doc).map_err(|e| StoreError::Write(e.to_string()))
    }

    fn from_bson(mut doc: bson::Document) -> Document {
        doc.remove("_id");
        match Bson::Document(doc).into_relaxed_extjson() {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    fn filter_doc(filter: Option<&Filter>) -> Result<bson::Document, StoreError> {
        Ok(match filter {
            None => doc! {},
            Some(Filter::Eq { field, value }) => {
                let value = bson::to_bson(value).map_err(|e| StoreError::Query(e.to_string()))?;
                doc! { field.as_str(): value }
            },
            Some(Filter::Gt { field, value }) => doc! { field.as_str(): { "$gt": *value } },
        })
    }

    /// Uniqueness of an index already covering this spec, matched by name
    /// or by an identical `{field: 1}` key
    fn existing_uniqueness(models: &[IndexModel], index: &IndexSpec, name: &str) -> Option<bool> {
        models
            .iter()
            .find(|model| {
                let named = model
                    .options
                    .as_ref()
                    .and_then(|o| o.name.as_deref())
                    .is_some_and(|n| n == name);
                let same_key = model.keys.len() == 1
                    && Self::as_f64(model.keys.get(index.field.as_str())) == Some(1.0);
                named || same_key
            })
            .map(|model| {
                model
                    .options
                    .as_ref()
                    .and_then(|o| o.unique)
                    .unwrap_or(false)
            })
    }

    fn concern_message(error: &WriteConcernError) -> String {
        format!("write concern error {}: {}", error.code, error.message)
    }

    fn as_f64(value: Option<&Bson>) -> Option<f64> {
        match value? {
            Bson::Double(v) => Some(*v),
            Bson::Int32(v) => Some(f64::from(*v)),
            Bson::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<IndexOutcome, StoreError> {
        let name = index.name();

        // A missing collection lists no indexes
        let existing: Vec<IndexModel> = match self.collection.list_indexes().await {
            Ok(cursor) => cursor.try_collect().await.unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        if let Some(unique) = Self::existing_uniqueness(&existing, index, &name) {
            return index.check_existing(&name, unique);
        }

        let model = IndexModel::builder()
            .keys(doc! { index.field.as_str(): 1 })
            .options(
                IndexOptions::builder()
                    .name(name.clone())
                    .unique(index.unique)
                    .build(),
            )
            .build();

        match self.collection.create_index(model).await {
            Ok(_) => Ok(IndexOutcome::Created),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Command(command) if command.code == INDEX_ALREADY_EXISTS => {
                    Ok(IndexOutcome::AlreadyExists)
                },
                _ => Err(StoreError::Index(format!("{name}: {e}"))),
            },
        }
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = self.collection.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }

    async fn insert_unordered(&self, docs: Vec<Document>) -> Result<InsertOutcome, StoreError> {
        let sent = docs.len();
        if sent == 0 {
            return Ok(InsertOutcome::default());
        }
        let docs = docs
            .into_iter()
            .map(Self::to_bson)
            .collect::<Result<Vec<_>, _>>()?;

        match self.collection.insert_many(docs).ordered(false).await {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.inserted_ids.len(),
                ..InsertOutcome::default()
            }),
            // Documents missing from `write_errors` were written, even when a
            // write concern error is reported alongside them
            Err(e) => match e.kind.as_ref() {
                ErrorKind::InsertMany(partial) => {
                    let failures: Vec<WriteFailure> = partial
                        .write_errors
                        .iter()
                        .flatten()
                        .map(|w| WriteFailure {
                            index: w.index,
                            code: Some(w.code),
                            message: w.message.clone(),
                        })
                        .collect();
                    let concern = partial.write_concern_error.as_ref().map(Self::concern_message);
                    Ok(InsertOutcome::partial(sent, failures, concern))
                },
                ErrorKind::Write(MongoWriteFailure::WriteError(w)) if sent == 1 => {
                    let failure = WriteFailure {
                        index: 0,
                        code: Some(w.code),
                        message: w.message.clone(),
                    };
                    Ok(InsertOutcome::partial(sent, vec![failure], None))
                },
                ErrorKind::Write(MongoWriteFailure::WriteConcernError(w)) if sent == 1 => {
                    Ok(InsertOutcome::partial(sent, Vec::new(), Some(Self::concern_message(w))))
                },
                _ => Err(StoreError::Mongo(e)),
            },
        }
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let filter = Self::filter_doc(filter)?;
        Ok(self.collection.count_documents(filter).await?)
    }

    async fn find_first(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .collection
            .find(doc! {})
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;
        let docs: Vec<bson::Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(Self::from_bson).collect())
    }

    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>, StoreError> {
        let values = self.collection.distinct(field, doc! {}).await?;
        let mut strings: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect();
        strings.sort();
        strings.dedup();
        Ok(strings)
    }

    async fn numeric_stats(&self, field: &str) -> Result<FieldStats, StoreError> {
        let path = format!("${field}");
        let pipeline = vec![
            doc! { "$match": { field: { "$type": "number" } } },
            doc! { "$group": {
                "_id": Bson::Null,
                "min": { "$min": path.as_str() },
                "max": { "$max": path.as_str() },
                "avg": { "$avg": path.as_str() },
                "count": { "$sum": 1 },
            } },
        ];

        let mut cursor = self.collection.aggregate(pipeline).await?;
        let Some(group) = cursor.try_next().await? else {
            return Ok(FieldStats::default());
        };

        Ok(FieldStats {
            min: Self::as_f64(group.get("min")),
            max: Self::as_f64(group.get("max")),
            avg: Self::as_f64(group.get("avg")),
            count: Self::as_f64(group.get("count")).map_or(0, |c| c as u64),
        })
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
