//! Shared helpers for catalog-ingest integration tests
//!
//! - CSV fixtures written to temp files
//! - A reporter that records every event
//! - A fault-injecting wrapper around [`MemoryStore`]
//! - MongoDB and PostgreSQL containers via testcontainers

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use catalog_ingest::cleaner::CleanSummary;
use catalog_ingest::loader::{BatchOutcome, LoadReport};
use catalog_ingest::pipeline::PipelineState;
use catalog_ingest::report::Reporter;
use catalog_ingest::store::{
    Document, DocumentStore, FieldStats, Filter, IndexOutcome, IndexSpec, InsertOutcome,
    MemoryStore, StoreError,
};
use catalog_ingest::verifier::VerificationReport;
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mongo::Mongo;
use testcontainers_modules::postgres::Postgres;
use tracing::info;

pub const HEADER: &str =
    "id,cost,category,name,brand,retail_price,department,sku,distribution_center_id";

/// Write `HEADER` plus the given lines to a temp file
pub fn write_csv(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    writeln!(file, "{HEADER}").expect("Failed to write header");
    for line in lines {
        writeln!(file, "{line}").expect("Failed to write row");
    }
    file.flush().expect("Failed to flush temp file");
    file
}

/// Generated catalog rows with ids `1..=n`
pub fn catalog_lines(n: usize) -> Vec<String> {
    (1..=n)
        .map(|id| {
            let category = if id % 3 == 0 { "Accessories" } else { "Jeans" };
            let brand = if id % 2 == 0 { "MG" } else { "Levi" };
            format!(
                "{id},{cost:.2},{category},Item {id},{brand},{price:.2},Women,SKU{id},{dc}",
                cost = id as f64 * 1.5,
                price = id as f64 * 4.0,
                dc = id % 10 + 1
            )
        })
        .collect()
}

// ============================================================================
// Recording reporter
// ============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub states: Mutex<Vec<PipelineState>>,
    pub batches: Mutex<Vec<BatchOutcome>>,
    pub cleaned: Mutex<Option<CleanSummary>>,
    pub loads: AtomicUsize,
    pub verifications: AtomicUsize,
}

impl RecordingReporter {
    pub fn states(&self) -> Vec<PipelineState> {
        self.states.lock().unwrap().clone()
    }

    pub fn batch_numbers(&self) -> Vec<usize> {
        let mut numbers: Vec<usize> =
            self.batches.lock().unwrap().iter().map(|b| b.batch).collect();
        numbers.sort_unstable();
        numbers
    }
}

impl Reporter for RecordingReporter {
    fn stage(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }

    fn rows_cleaned(&self, summary: &CleanSummary) {
        *self.cleaned.lock().unwrap() = Some(summary.clone());
    }

    fn batch_finished(&self, outcome: &BatchOutcome) {
        self.batches.lock().unwrap().push(outcome.clone());
    }

    fn load_finished(&self, _report: &LoadReport) {
        self.loads.fetch_add(1, Ordering::SeqCst);
    }

    fn verification_finished(&self, _report: &VerificationReport) {
        self.verifications.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Fault-injecting store
// ============================================================================

/// Wraps a [`MemoryStore`] and fails selected operations
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_ping: bool,
    pub fail_delete: bool,
    /// Fields whose index creation fails
    pub fail_index_fields: HashSet<String>,
    /// Fields whose numeric aggregate fails
    pub fail_stats_fields: HashSet<String>,
    /// 1-based insert calls that are rejected whole
    pub fail_insert_calls: HashSet<usize>,
    /// 1-based insert calls that are applied but then report a write concern error
    pub write_concern_calls: HashSet<usize>,
    pub deletes: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_ping {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        self.inner.ping().await
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<IndexOutcome, StoreError> {
        if self.fail_index_fields.contains(&index.field) {
            return Err(StoreError::Index(format!("not authorized to index {}", index.field)));
        }
        self.inner.ensure_index(index).await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete {
            return Err(StoreError::Write("delete not permitted".to_string()));
        }
        self.inner.delete_all().await
    }

    async fn insert_unordered(&self, docs: Vec<Document>) -> Result<InsertOutcome, StoreError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert_calls.contains(&call) {
            return Err(StoreError::Write("batch rejected".to_string()));
        }
        let mut outcome = self.inner.insert_unordered(docs).await?;
        if self.write_concern_calls.contains(&call) {
            outcome.batch_error =
                Some("write concern error 64: waiting for replication timed out".into());
        }
        Ok(outcome)
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }

    async fn find_first(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        self.inner.find_first(limit).await
    }

    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>, StoreError> {
        self.inner.distinct_strings(field).await
    }

    async fn numeric_stats(&self, field: &str) -> Result<FieldStats, StoreError> {
        if self.fail_stats_fields.contains(field) {
            return Err(StoreError::Query(format!("aggregation on {field} timed out")));
        }
        self.inner.numeric_stats(field).await
    }
}

// ============================================================================
// Containers
// ============================================================================

/// MongoDB container
pub struct TestMongo {
    container: ContainerAsync<Mongo>,
    uri: String,
}

impl TestMongo {
    pub async fn start() -> Result<Self> {
        info!("Starting MongoDB test container...");

        let container = Mongo::default()
            .start()
            .await
            .context("Failed to start MongoDB container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(27017.tcp())
            .await
            .context("Failed to get container port")?;

        Ok(Self {
            container,
            uri: format!("mongodb://{host}:{port}"),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// PostgreSQL container
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    uri: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        Ok(Self {
            container,
            uri: format!("postgresql://postgres:postgres@{host}:{port}/postgres"),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}
