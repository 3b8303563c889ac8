//! Catalog Ingest Library
//!
//! Loads a product catalog CSV into a document store and verifies the result.
//!
//! # Stages
//!
//! - **source**: read the delimited file into raw rows
//! - **connector**: open a store session and ping it
//! - **indexes**: ensure the unique `id` index and secondary indexes
//! - **cleaner**: coerce rows against the declared column table
//! - **loader**: truncate the collection, then insert in unordered batches
//! - **verifier**: read-only counts, samples, distincts and statistics
//!
//! [`pipeline::Pipeline`] drives them in that order.
//!
//! # Example
//!
//! ```no_run
//! use catalog_ingest::config::IngestConfig;
//! use catalog_ingest::pipeline::Pipeline;
//! use catalog_ingest::report::LogReporter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let outcome = Pipeline::new(config, Arc::new(LogReporter)).run().await?;
//!     println!("inserted {}", outcome.total_inserted());
//!     Ok(())
//! }
//! ```

pub mod cleaner;
pub mod config;
pub mod connector;
pub mod indexes;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod verifier;

pub use cleaner::{CleanResult, CleanSummary, SchemaCleaner};
pub use config::IngestConfig;
pub use loader::{BatchOutcome, ChunkedLoader, LoadReport};
pub use models::{RawRow, ValidatedRecord};
pub use pipeline::{Pipeline, PipelineError, PipelineState, RunOutcome};
pub use store::{DocumentStore, StoreError};
pub use verifier::{VerificationReport, Verifier};
