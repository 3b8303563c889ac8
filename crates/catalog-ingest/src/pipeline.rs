//! Run state machine
//!
//! ```text
//! Disconnected -> Connected -> IndexesReady -> Loading -> Loaded -> Verified
//!       \              \
//!        `-> Failed     `-> Failed
//! ```
//!
//! `Failed` is only reachable before anything destructive happens: reading
//! the input and connecting are the only fatal steps. Once `Loading` begins
//! the run always reaches `Loaded`, and a failed verification leaves it there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cleaner::{CleanSummary, SchemaCleaner};
use crate::config::IngestConfig;
use crate::connector::{self, Session};
use crate::indexes::{IndexProvisioner, IndexReport};
use crate::loader::{ChunkedLoader, LoadReport};
use crate::report::Reporter;
use crate::source::{SourceData, SourceError, SourceReader, SourceSummary};
use crate::store::{DocumentStore, StoreError};
use crate::verifier::{SanityQuery, VerificationReport, Verifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Disconnected,
    Connected,
    IndexesReady,
    Loading,
    Loaded,
    Verified,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Disconnected, Connected)
                | (Disconnected, Failed)
                | (Connected, IndexesReady)
                | (Connected, Failed)
                | (IndexesReady, Loading)
                | (Loading, Loaded)
                | (Loaded, Verified)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Verified | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Disconnected => "disconnected",
            PipelineState::Connected => "connected",
            PipelineState::IndexesReady => "indexes_ready",
            PipelineState::Loading => "loading",
            PipelineState::Loaded => "loaded",
            PipelineState::Verified => "verified",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Fatal run errors; both happen before any destructive step
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read input: {0}")]
    Source(#[from] SourceError),

    #[error("could not connect to the document store: {0}")]
    Connection(#[source] StoreError),
}

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub source: SourceSummary,
    pub indexes: IndexReport,
    pub clean: CleanSummary,
    pub load: LoadReport,
    pub verification: Option<VerificationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn total_inserted(&self) -> usize {
        self.load.total_inserted
    }

    /// Zero inserted documents counts as a failed run
    pub fn succeeded(&self) -> bool {
        self.load.total_inserted > 0
    }
}

pub struct Pipeline {
    run_id: Uuid,
    config: IngestConfig,
    reporter: Arc<dyn Reporter>,
    store: Option<Arc<dyn DocumentStore>>,
    sanity_queries: Vec<SanityQuery>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: IngestConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            reporter,
            store: None,
            sanity_queries: SanityQuery::defaults(),
            state: PipelineState::Disconnected,
        }
    }

    /// Use this store instead of opening one from the configured URI
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sanity_queries(mut self, queries: Vec<SanityQuery>) -> Self {
        self.sanity_queries = queries;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Read the configured input and run every stage
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(&mut self) -> Result<RunOutcome, PipelineError> {
        let reader = SourceReader::new(self.config.source.delimiter);
        let data = match reader.read_path(&self.config.source.input) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "Could not read input, nothing was changed");
                self.transition(PipelineState::Failed);
                return Err(e.into());
            },
        };
        self.run_source(data).await
    }

    /// Run every stage over rows that were already read
    pub async fn run_source(&mut self, data: SourceData) -> Result<RunOutcome, PipelineError> {
        let started_at = Utc::now();
        let session = self.connect().await?;
        let store = session.store();

        let indexes = IndexProvisioner::default().ensure_indexes(store).await;
        if !indexes.all_ready() {
            warn!(
                failed = indexes.failed().count(),
                "Loading without every index in place"
            );
        }
        self.transition(PipelineState::IndexesReady);

        let source = data.summary;
        let cleaned = SchemaCleaner::new(self.config.null_tokens()).clean(data.rows);
        let clean = cleaned.summary.clone();
        self.reporter.rows_cleaned(&clean);

        self.transition(PipelineState::Loading);
        let loader = ChunkedLoader::new(self.config.load.batch_size, self.config.load.concurrency)
            .with_input_sha256(source.sha256.clone());
        let load = loader.load(store, cleaned, self.reporter.as_ref()).await;
        self.transition(PipelineState::Loaded);

        let verification = if self.config.verify.enabled {
            let report = self.verifier().verify(store).await;
            self.reporter.verification_finished(&report);
            if report.complete {
                self.transition(PipelineState::Verified);
            } else {
                warn!(
                    failed_checks = report.failures.len(),
                    "Verification incomplete; the load itself is unaffected"
                );
            }
            Some(report)
        } else {
            debug!("Verification skipped");
            None
        };

        session.close().await;

        let outcome = RunOutcome {
            run_id: self.run_id,
            state: self.state,
            source,
            indexes,
            clean,
            load,
            verification,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            state = %outcome.state,
            inserted = outcome.total_inserted(),
            "Pipeline finished"
        );
        Ok(outcome)
    }

    /// Connect and run only the verifier
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn verify_only(&mut self) -> Result<VerificationReport, PipelineError> {
        let session = self.connect().await?;
        let report = self.verifier().verify(session.store()).await;
        self.reporter.verification_finished(&report);
        session.close().await;
        Ok(report)
    }

    async fn connect(&mut self) -> Result<Session, PipelineError> {
        let target = self.config.store_target();
        let connected = match &self.store {
            Some(store) => connector::attach(Arc::clone(store), &target).await,
            None => connector::connect(&target).await,
        };

        match connected {
            Ok(session) => {
                self.transition(PipelineState::Connected);
                Ok(session)
            },
            Err(e) => {
                error!(
                    uri = %self.config.redacted_uri(),
                    error = %e,
                    "Connection failed, aborting before any destructive step"
                );
                self.transition(PipelineState::Failed);
                Err(PipelineError::Connection(e))
            },
        }
    }

    fn verifier(&self) -> Verifier {
        Verifier::new(self.config.verify.sample_size, self.sanity_queries.clone())
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected pipeline transition");
        }
        debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        self.reporter.stage(next);
    }
}
