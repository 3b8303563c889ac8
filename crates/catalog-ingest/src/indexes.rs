//! Index provisioning
//!
//! Ensures the unique `id` index and the secondary lookup indexes. Nothing in
//! here can fail the run: an index that cannot be built is logged and listed
//! as failed, and loading goes ahead without it.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::schema::{BRAND, CATEGORY, DEPARTMENT, ID, SKU};
use crate::store::{DocumentStore, IndexOutcome, IndexSpec};

/// The indexes every catalog collection carries
pub fn required_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::unique(ID.name),
        IndexSpec::secondary(CATEGORY.name),
        IndexSpec::secondary(BRAND.name),
        IndexSpec::secondary(DEPARTMENT.name),
        IndexSpec::secondary(SKU.name),
    ]
}

/// State of one index after provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum IndexStatus {
    Created,
    AlreadyExists,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub field: String,
    pub unique: bool,
    #[serde(flatten)]
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub entries: Vec<IndexEntry>,
}

impl IndexReport {
    pub fn failed(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, IndexStatus::Failed(_)))
    }

    /// True when every index is in place
    pub fn all_ready(&self) -> bool {
        self.failed().next().is_none()
    }
}

pub struct IndexProvisioner {
    indexes: Vec<IndexSpec>,
}

impl Default for IndexProvisioner {
    fn default() -> Self {
        Self::new(required_indexes())
    }
}

impl IndexProvisioner {
    pub fn new(indexes: Vec<IndexSpec>) -> Self {
        Self { indexes }
    }

    /// Ensure every index; safe to call repeatedly
    #[instrument(skip_all, fields(backend = store.backend()))]
    pub async fn ensure_indexes(&self, store: &dyn DocumentStore) -> IndexReport {
        let mut report = IndexReport::default();

        for index in &self.indexes {
            let status = match store.ensure_index(index).await {
                Ok(IndexOutcome::Created) => {
                    info!(index = %index.name(), unique = index.unique, "Created index");
                    IndexStatus::Created
                },
                Ok(IndexOutcome::AlreadyExists) => IndexStatus::AlreadyExists,
                Err(e) => {
                    warn!(
                        index = %index.name(),
                        error = %e,
                        "Index creation failed, continuing without it"
                    );
                    IndexStatus::Failed(e.to_string())
                },
            };

            report.entries.push(IndexEntry {
                name: index.name(),
                field: index.field.clone(),
                unique: index.unique,
                status,
            });
        }

        report
    }
}
