//! Post-load verification
//!
//! Read-only queries over the loaded collection. Every check runs on its own:
//! a failing check is logged, recorded in [`VerificationReport::failures`],
//! and the remaining checks still run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, instrument, warn};

use crate::schema::{BRAND, CATEGORY, COST, RETAIL_PRICE};
use crate::store::{Document, DocumentStore, FieldStats, Filter, StoreError};

pub const DEFAULT_SAMPLE_SIZE: usize = 3;

/// A named spot-check count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityQuery {
    pub name: String,
    pub filter: Filter,
}

impl SanityQuery {
    pub fn new(name: impl Into<String>, filter: Filter) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }

    /// Accessories, retail price above 50, and brand MG
    pub fn defaults() -> Vec<SanityQuery> {
        vec![
            SanityQuery::new("category_accessories", Filter::eq(CATEGORY.name, "Accessories")),
            SanityQuery::new("retail_price_gt_50", Filter::gt(RETAIL_PRICE.name, 50.0)),
            SanityQuery::new("brand_mg", Filter::eq(BRAND.name, "MG")),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub check: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total_count: Option<u64>,
    pub sample: Vec<Document>,
    pub categories: Option<Vec<String>>,
    pub brands: Option<Vec<String>>,
    pub cost: Option<FieldStats>,
    pub retail_price: Option<FieldStats>,
    pub sanity_counts: BTreeMap<String, u64>,
    pub failures: Vec<CheckFailure>,
    /// False when any check failed
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct Verifier {
    sample_size: usize,
    sanity_queries: Vec<SanityQuery>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE, SanityQuery::defaults())
    }
}

impl Verifier {
    pub fn new(sample_size: usize, sanity_queries: Vec<SanityQuery>) -> Self {
        Self {
            sample_size,
            sanity_queries,
        }
    }

    #[instrument(skip_all, fields(backend = store.backend()))]
    pub async fn verify(&self, store: &dyn DocumentStore) -> VerificationReport {
        let mut report = VerificationReport::default();
        let mut failures = Vec::new();

        report.total_count = check(&mut failures, "total_count", store.count(None)).await;
        report.sample = check(&mut failures, "sample", store.find_first(self.sample_size))
            .await
            .unwrap_or_default();
        report.categories = check(
            &mut failures,
            "distinct_category",
            store.distinct_strings(CATEGORY.name),
        )
        .await;
        report.brands = check(
            &mut failures,
            "distinct_brand",
            store.distinct_strings(BRAND.name),
        )
        .await;
        report.cost = check(&mut failures, "stats_cost", store.numeric_stats(COST.name)).await;
        report.retail_price = check(
            &mut failures,
            "stats_retail_price",
            store.numeric_stats(RETAIL_PRICE.name),
        )
        .await;

        for query in &self.sanity_queries {
            let name = format!("sanity_{}", query.name);
            let counted = check(&mut failures, &name, store.count(Some(&query.filter))).await;
            if let Some(count) = counted {
                report.sanity_counts.insert(query.name.clone(), count);
            }
        }

        report.complete = failures.is_empty();
        report.failures = failures;

        info!(
            total = report.total_count,
            categories = report.categories.as_ref().map(Vec::len),
            brands = report.brands.as_ref().map(Vec::len),
            failed_checks = report.failures.len(),
            "Verification finished"
        );
        report
    }
}

async fn check<T>(
    failures: &mut Vec<CheckFailure>,
    name: &str,
    query: impl Future<Output = Result<T, StoreError>>,
) -> Option<T> {
    match query.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(check = name, error = %e, "Verification check failed");
            failures.push(CheckFailure {
                check: name.to_string(),
                error: e.to_string(),
            });
            None
        },
    }
}
