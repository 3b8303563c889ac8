//! PostgreSQL backend storing each document as a JSONB row
//!
//! The database name from the target becomes a schema and the collection
//! becomes a table `(seq BIGSERIAL, doc JSONB)`. Indexes are expression
//! indexes on `doc->'field'`; `seq` gives a stable natural order.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use super::{
    is_plain_identifier, redact_uri, Document, DocumentStore, FieldStats, Filter, IndexOutcome,
    IndexSpec, InsertOutcome, StoreError, StoreTarget, WriteFailure,
};

const MAX_CONNECTIONS: u32 = 8;

/// One JSONB table in a Postgres schema
pub struct PgDocumentStore {
    pool: PgPool,
    schema: String,
    table: String,
}

impl PgDocumentStore {
    /// Connect and create the schema and table if needed
    #[instrument(skip(target), fields(uri = %redact_uri(&target.uri)))]
    pub async fn open(target: &StoreTarget) -> Result<Self, StoreError> {
        for name in [&target.database, &target.collection] {
            if !is_plain_identifier(name) {
                return Err(StoreError::InvalidIdentifier(name.clone()));
            }
        }

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(target.connect_timeout)
            .connect(&target.uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            schema: target.database.clone(),
            table: target.collection.clone(),
        };
        store.create_table().await?;

        info!(schema = %store.schema, table = %store.table, "Postgres document table ready");
        Ok(store)
    }

    async fn create_table(&self) -> Result<(), StoreError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.schema))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL PRIMARY KEY, doc JSONB NOT NULL)",
            self.qualified()
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    fn index_name(&self, index: &IndexSpec) -> String {
        format!("{}_{}_idx", self.table, index.field)
    }
}

/// Which submitted documents were not returned by the insert
///
/// Returned keys are matched as a multiset so that a key repeated inside one
/// batch marks only the later copies as rejected.
fn unmatched_positions(sent_keys: &[Value], returned_keys: Vec<Value>) -> Vec<usize> {
    let mut remaining: HashMap<String, usize> = HashMap::new();
    for key in returned_keys {
        *remaining.entry(key.to_string()).or_default() += 1;
    }

    sent_keys
        .iter()
        .enumerate()
        .filter_map(|(index, key)| match remaining.get_mut(&key.to_string()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                None
            },
            _ => Some(index),
        })
        .collect()
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<IndexOutcome, StoreError> {
        if !is_plain_identifier(&index.field) {
            return Err(StoreError::InvalidIdentifier(index.field.clone()));
        }
        let name = self.index_name(index);

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT indexdef FROM pg_indexes WHERE schemaname = $1 AND indexname = $2",
        )
        .bind(&self.schema)
        .bind(&name)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(definition) = existing {
            return index.check_existing(&name, is_unique_definition(&definition));
        }

        let unique = if index.unique { "UNIQUE " } else { "" };
        sqlx::query(&format!(
            "CREATE {unique}INDEX IF NOT EXISTS \"{name}\" ON {} ((doc->'{}'))",
            self.qualified(),
            index.field
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Index(format!("{name}: {e}")))?;

        debug!(index = %name, unique = index.unique, "Created expression index");
        Ok(IndexOutcome::Created)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {}", self.qualified()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_unordered(&self, docs: Vec<Document>) -> Result<InsertOutcome, StoreError> {
        if docs.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let sent_keys: Vec<Value> = docs
            .iter()
            .map(|doc| doc.get("id").cloned().unwrap_or(Value::Null))
            .collect();

        // Rows hitting any unique index are skipped individually
        let returned: Vec<Option<Value>> = sqlx::query_scalar(&format!(
            "INSERT INTO {} (doc) \
             SELECT e.doc FROM jsonb_array_elements($1::jsonb) WITH ORDINALITY AS e(doc, ord) \
             ORDER BY e.ord \
             ON CONFLICT DO NOTHING \
             RETURNING doc->'id'",
            self.qualified()
        ))
        .bind(Json(&docs))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Write(e.to_string()))?;

        let inserted = returned.len();
        let returned_keys = returned
            .into_iter()
            .map(|key| key.unwrap_or(Value::Null))
            .collect();

        let failures = unmatched_positions(&sent_keys, returned_keys)
            .into_iter()
            .map(|index| WriteFailure {
                index,
                code: None,
                message: format!(
                    "duplicate key value violates a unique index: id={}",
                    sent_keys[index]
                ),
            })
            .collect();

        Ok(InsertOutcome {
            inserted,
            failures,
            batch_error: None,
        })
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let table = self.qualified();
        let count: i64 = match filter {
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&self.pool)
                    .await?
            },
            Some(Filter::Eq { field, value }) => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {table} WHERE doc->$1::text = $2::jsonb"
                ))
                .bind(field)
                .bind(Json(value))
                .fetch_one(&self.pool)
                .await?
            },
            Some(Filter::Gt { field, value }) => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {table} WHERE CASE \
                     WHEN jsonb_typeof(doc->$1::text) = 'number' THEN (doc->$1::text)::float8 > $2 \
                     ELSE false END"
                ))
                .bind(field)
                .bind(*value)
                .fetch_one(&self.pool)
                .await?
            },
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_first(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let docs: Vec<Json<Document>> = sqlx::query_scalar(&format!(
            "SELECT doc FROM {} ORDER BY seq LIMIT $1",
            self.qualified()
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(docs.into_iter().map(|Json(doc)| doc).collect())
    }

    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>, StoreError> {
        let mut values: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT DISTINCT doc->>$1::text FROM {} WHERE jsonb_typeof(doc->$1::text) = 'string'",
            self.qualified()
        ))
        .bind(field)
        .fetch_all(&self.pool)
        .await?;
        // Byte order, independent of the database collation
        values.sort();
        Ok(values)
    }

    async fn numeric_stats(&self, field: &str) -> Result<FieldStats, StoreError> {
        let (min, max, avg, count): (Option<f64>, Option<f64>, Option<f64>, i64) =
            sqlx::query_as(&format!(
                "SELECT MIN(v), MAX(v), AVG(v), COUNT(v) FROM ( \
                 SELECT CASE WHEN jsonb_typeof(doc->$1::text) = 'number' \
                 THEN (doc->$1::text)::float8 END AS v FROM {} ) AS values_of_field",
                self.qualified()
            ))
            .bind(field)
            .fetch_one(&self.pool)
            .await?;

        Ok(FieldStats {
            min,
            max,
            avg,
            count: u64::try_from(count).unwrap_or_default(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// `pg_indexes.indexdef` reads `CREATE UNIQUE INDEX ...` for unique indexes
fn is_unique_definition(definition: &str) -> bool {
    definition
        .trim_start()
        .to_ascii_uppercase()
        .starts_with("CREATE UNIQUE INDEX")
}
