//! Chunked bulk loader
//!
//! **Destructive:** [`ChunkedLoader::load`] deletes every document in the
//! destination collection before writing the first batch. Re-running with the
//! same input therefore reproduces the same final state, and whatever the
//! collection held before is gone.
//!
//! Records are split into fixed-size batches and each batch is written with
//! one unordered bulk insert. A rejected document never blocks its siblings,
//! and a rejected batch never stops the batches after it.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cleaner::CleanResult;
use crate::models::ValidatedRecord;
use crate::report::Reporter;
use crate::store::{Document, DocumentStore};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Per-document failures kept for each batch
pub const MAX_RECORDED_FAILURES_PER_BATCH: usize = 5;

/// Number of batches needed for `records` items
pub fn batch_count(records: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    records.div_ceil(batch_size)
}

/// A document rejected inside an otherwise applied batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    /// Position within the batch
    pub position: usize,
    pub id: i64,
    pub code: Option<i32>,
    pub message: String,
}

/// Accounting for one batch; `inserted + errored == size` always holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 1-based batch number
    pub batch: usize,
    pub size: usize,
    pub inserted: usize,
    pub errored: usize,
    /// First few per-document failures
    pub failures: Vec<DocumentFailure>,
    /// Set when the store rejected the batch as a whole, or raised an
    /// error after writing it
    pub batch_error: Option<String>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.errored == 0
    }
}

/// Counts for one load, sealed once the last batch finishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub records_submitted: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    /// Documents removed by the initial truncation
    pub truncated: Option<u64>,
    pub truncate_error: Option<String>,
    /// Sorted by batch number
    pub batches: Vec<BatchOutcome>,
    pub total_inserted: usize,
    pub total_errored: usize,
    /// SHA-256 of the input file
    pub input_sha256: Option<String>,
    pub duration_ms: u64,
}

impl LoadReport {
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Every submitted record landed without any store error
    pub fn is_complete(&self) -> bool {
        self.truncate_error.is_none()
            && self.total_errored == 0
            && self.batches.iter().all(|b| b.batch_error.is_none())
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedLoader {
    batch_size: usize,
    concurrency: usize,
    input_sha256: Option<String>,
}

impl Default for ChunkedLoader {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY)
    }
}

impl ChunkedLoader {
    /// Zero values are raised to 1
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            input_sha256: None,
        }
    }

    /// Fingerprint of the input, copied into the report
    pub fn with_input_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.input_sha256 = Some(sha256.into());
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Truncate the collection, then insert every cleaned record
    pub async fn load(
        &self,
        store: &dyn DocumentStore,
        cleaned: CleanResult,
        reporter: &dyn Reporter,
    ) -> LoadReport {
        let started = Instant::now();
        let records = cleaned.validated;
        let mut report = LoadReport {
            rows_read: cleaned.summary.rows_in,
            rows_dropped: cleaned.summary.dropped,
            records_submitted: records.len(),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            input_sha256: self.input_sha256.clone(),
            ..LoadReport::default()
        };

        // Truncation happens-before any batch write
        match store.delete_all().await {
            Ok(removed) => {
                info!(removed, "Truncated destination collection");
                report.truncated = Some(removed);
            },
            Err(e) => {
                warn!(error = %e, "Truncation failed, loading on top of existing documents");
                report.truncate_error = Some(e.to_string());
            },
        }

        let total_batches = batch_count(records.len(), self.batch_size);
        reporter.load_started(records.len(), total_batches);
        info!(
            records = records.len(),
            batches = total_batches,
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "Starting bulk load"
        );

        let chunks = records.chunks(self.batch_size).enumerate();
        let mut batches: Vec<BatchOutcome> = stream::iter(chunks)
            .map(|(index, chunk)| {
                let batch = index + 1;
                async move {
                    let outcome = run_batch(store, batch, chunk).await;
                    reporter.batch_finished(&outcome);
                    outcome
                }
                .instrument(info_span!("batch", batch))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        batches.sort_by_key(|b| b.batch);

        report.total_inserted = batches.iter().map(|b| b.inserted).sum();
        report.total_errored = batches.iter().map(|b| b.errored).sum();
        report.batches = batches;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            inserted = report.total_inserted,
            errored = report.total_errored,
            duration_ms = report.duration_ms,
            "Bulk load finished"
        );
        reporter.load_finished(&report);
        report
    }
}

async fn run_batch(
    store: &dyn DocumentStore,
    batch: usize,
    records: &[ValidatedRecord],
) -> BatchOutcome {
    let size = records.len();
    let mut failures = Vec::new();
    let mut docs: Vec<Document> = Vec::with_capacity(size);
    // Batch position of each document actually sent
    let mut positions: Vec<usize> = Vec::with_capacity(size);

    for (position, record) in records.iter().enumerate() {
        match record.to_document() {
            Ok(doc) => {
                docs.push(doc);
                positions.push(position);
            },
            Err(e) => failures.push(DocumentFailure {
                position,
                id: record.id,
                code: None,
                message: format!("serialization failed: {e}"),
            }),
        }
    }

    let mut outcome = BatchOutcome {
        batch,
        size,
        inserted: 0,
        errored: size,
        failures: Vec::new(),
        batch_error: None,
    };

    if !docs.is_empty() {
        match store.insert_unordered(docs).await {
            Ok(inserted) => {
                outcome.inserted = inserted.inserted.min(size);
                outcome.errored = size - outcome.inserted;
                if let Some(error) = inserted.batch_error {
                    warn!(
                        batch,
                        inserted = outcome.inserted,
                        error = %error,
                        "Batch written with a store error"
                    );
                    outcome.batch_error = Some(error);
                }
                for failure in inserted.failures {
                    let position = positions.get(failure.index).copied().unwrap_or(failure.index);
                    failures.push(DocumentFailure {
                        position,
                        id: records.get(position).map_or(0, |r| r.id),
                        code: failure.code,
                        message: failure.message,
                    });
                }
            },
            Err(e) => {
                warn!(batch, size, error = %e, "Batch rejected by store");
                outcome.batch_error = Some(e.to_string());
            },
        }
    }

    failures.sort_by_key(|f| f.position);
    failures.truncate(MAX_RECORDED_FAILURES_PER_BATCH);
    outcome.failures = failures;

    if !outcome.failures.is_empty() {
        warn!(
            batch,
            inserted = outcome.inserted,
            errored = outcome.errored,
            first_error = outcome.failures.first().map(|f| f.message.as_str()),
            "Batch partially inserted"
        );
    } else if outcome.errored == 0 {
        debug!(batch, inserted = outcome.inserted, "Batch inserted");
    }

    outcome
}
