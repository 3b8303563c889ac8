//! Document store interface and backends
//!
//! The pipeline only talks to the destination through [`DocumentStore`]:
//! unordered bulk inserts, index creation, a full delete, and a handful of
//! read-only queries for verification. Backends are picked by URI scheme:
//!
//! | Scheme | Backend |
//! |---|---|
//! | `mongodb://`, `mongodb+srv://` | [`MongoStore`] |
//! | `postgres://`, `postgresql://` | [`PgDocumentStore`] (JSONB rows) |
//! | `memory://` | [`MemoryStore`] (in-process, used for dry runs) |

pub mod memory;
pub mod mongo;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use postgres::PgDocumentStore;

/// A stored document: a JSON object
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Errors surfaced by store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unsupported store URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid identifier '{0}': use letters, digits and underscores")]
    InvalidIdentifier(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// An index to provision on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: true,
        }
    }

    pub fn secondary(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
        }
    }

    /// Ascending single-field index name, `<field>_1`
    pub fn name(&self) -> String {
        format!("{}_1", self.field)
    }

    /// Accept an index already on the server only if its uniqueness matches
    pub fn check_existing(
        &self,
        name: &str,
        existing_unique: bool,
    ) -> Result<IndexOutcome, StoreError> {
        if existing_unique == self.unique {
            Ok(IndexOutcome::AlreadyExists)
        } else {
            Err(StoreError::Index(format!(
                "index {name} already exists with unique={existing_unique}, expected unique={}",
                self.unique
            )))
        }
    }
}

/// Result of a successful `ensure_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    AlreadyExists,
}

/// A single document rejected by an unordered insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    /// Position of the document within its batch
    pub index: usize,
    /// Backend error code when the backend reports one (11000 for duplicate keys)
    pub code: Option<i32>,
    pub message: String,
}

/// Duplicate-key error code, as reported by MongoDB
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Result of an unordered bulk insert that reached the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub failures: Vec<WriteFailure>,
    /// Error the store raised for the batch after applying its writes,
    /// such as an unsatisfied write concern
    #[serde(default)]
    pub batch_error: Option<String>,
}

impl InsertOutcome {
    /// `sent` documents went out; everything not listed in `failures` landed
    pub fn partial(sent: usize, failures: Vec<WriteFailure>, batch_error: Option<String>) -> Self {
        Self {
            inserted: sent.saturating_sub(failures.len()),
            failures,
            batch_error,
        }
    }
}

/// Read-only count predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// `field == value`
    Eq {
        field: String,
        value: serde_json::Value,
    },
    /// `field > value`, numeric fields only
    Gt { field: String, value: f64 },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: f64) -> Self {
        Filter::Gt {
            field: field.into(),
            value,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq { field, .. } | Filter::Gt { field, .. } => field,
        }
    }

    /// Evaluate against an in-memory document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq { field, value } => match (doc.get(field), value) {
                (Some(found), expected) if found.is_number() && expected.is_number() => {
                    found.as_f64() == expected.as_f64()
                },
                (Some(found), expected) => found == expected,
                (None, expected) => expected.is_null(),
            },
            Filter::Gt { field, value } => doc
                .get(field)
                .and_then(serde_json::Value::as_f64)
                .is_some_and(|found| found > *value),
        }
    }
}

/// Min/max/average over the numeric values of one field; nulls are skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    /// Number of numeric values aggregated
    pub count: u64,
}

impl FieldStats {
    /// Fold a sequence of values the same way the store-side aggregates do
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = FieldStats::default();
        let mut sum = 0.0;
        for value in values {
            stats.min = Some(stats.min.map_or(value, |m| m.min(value)));
            stats.max = Some(stats.max.map_or(value, |m| m.max(value)));
            sum += value;
            stats.count += 1;
        }
        if stats.count > 0 {
            stats.avg = Some(sum / stats.count as f64);
        }
        stats
    }
}

/// Operations the pipeline needs from a destination collection
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs ("mongodb", "postgres", "memory")
    fn backend(&self) -> &'static str;

    /// Round-trip to the server; fails if the store is unreachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the index, or report that it already exists
    async fn ensure_index(&self, index: &IndexSpec) -> Result<IndexOutcome, StoreError>;

    /// Remove every document, returning how many were removed
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Insert without ordering guarantees; one rejected document never blocks
    /// its siblings. `Err` means the batch as a whole was not applied.
    async fn insert_unordered(&self, docs: Vec<Document>) -> Result<InsertOutcome, StoreError>;

    /// Count documents, optionally matching a filter
    async fn count(&self, filter: Option<&Filter>) -> Result<u64, StoreError>;

    /// The first `limit` documents in natural order
    async fn find_first(&self, limit: usize) -> Result<Vec<Document>, StoreError>;

    /// Sorted distinct string values of a field; nulls are excluded
    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>, StoreError>;

    /// Aggregate statistics over the numeric values of a field
    async fn numeric_stats(&self, field: &str) -> Result<FieldStats, StoreError>;

    /// Release client resources
    async fn close(&self) {}
}

/// Where to connect and which collection to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
}

/// Open a backend for the target's URI scheme; no liveness check yet
pub async fn open(target: &StoreTarget) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let scheme = target
        .uri
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();

    match scheme.as_str() {
        "mongodb" | "mongodb+srv" => Ok(Arc::new(MongoStore::open(target).await?)),
        "postgres" | "postgresql" => Ok(Arc::new(PgDocumentStore::open(target).await?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        _ => Err(StoreError::UnsupportedScheme(redact_uri(&target.uri))),
    }
}

/// Letters, digits and underscores, not starting with a digit
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}

/// Hide the password portion of a connection string
pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    match authority.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split_once(':').map_or(userinfo, |(user, _)| user);
            format!("{scheme}://{user}:****@{host}{tail}")
        },
        None => uri.to_string(),
    }
}
