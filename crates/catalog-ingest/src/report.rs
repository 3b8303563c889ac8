//! Per-run progress sinks
//!
//! Each pipeline run gets one [`Reporter`]. All methods default to no-ops so a
//! sink only implements the events it cares about.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::OnceLock;
use tracing::info;

use crate::cleaner::CleanSummary;
use crate::loader::{BatchOutcome, LoadReport};
use crate::pipeline::PipelineState;
use crate::verifier::VerificationReport;

pub trait Reporter: Send + Sync {
    /// The pipeline entered a new state
    fn stage(&self, _state: PipelineState) {}

    fn rows_cleaned(&self, _summary: &CleanSummary) {}

    fn load_started(&self, _records: usize, _batches: usize) {}

    fn batch_finished(&self, _outcome: &BatchOutcome) {}

    fn load_finished(&self, _report: &LoadReport) {}

    fn verification_finished(&self, _report: &VerificationReport) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Emits every event as a tracing record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn stage(&self, state: PipelineState) {
        info!(state = %state, "Pipeline state");
    }

    fn rows_cleaned(&self, summary: &CleanSummary) {
        info!(
            rows_in = summary.rows_in,
            rows_out = summary.rows_out,
            dropped = summary.dropped,
            duplicate_ids = summary.duplicate_ids,
            "Cleaning finished"
        );
    }

    fn batch_finished(&self, outcome: &BatchOutcome) {
        info!(
            batch = outcome.batch,
            size = outcome.size,
            inserted = outcome.inserted,
            errored = outcome.errored,
            "Batch finished"
        );
    }

    fn load_finished(&self, report: &LoadReport) {
        info!(
            inserted = report.total_inserted,
            errored = report.total_errored,
            batches = report.batch_count(),
            "Load finished"
        );
    }

    fn verification_finished(&self, report: &VerificationReport) {
        info!(
            total = report.total_count,
            complete = report.complete,
            "Verification finished"
        );
    }
}

/// Progress bar over batches, for interactive terminals
#[derive(Default)]
pub struct ProgressReporter {
    bar: OnceLock<ProgressBar>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_bar(batches: usize) -> ProgressBar {
        let bar = ProgressBar::new(batches as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} batches ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message("Loading documents");
        bar
    }
}

impl Reporter for ProgressReporter {
    fn stage(&self, state: PipelineState) {
        LogReporter.stage(state);
    }

    fn rows_cleaned(&self, summary: &CleanSummary) {
        LogReporter.rows_cleaned(summary);
    }

    fn load_started(&self, _records: usize, batches: usize) {
        let bar = self.bar.get_or_init(|| Self::create_bar(batches));
        bar.set_length(batches as u64);
    }

    fn batch_finished(&self, outcome: &BatchOutcome) {
        if let Some(bar) = self.bar.get() {
            bar.inc(1);
            if outcome.errored > 0 {
                bar.set_message(format!("Loading documents (batch {} had errors)", outcome.batch));
            }
        }
    }

    fn load_finished(&self, report: &LoadReport) {
        if let Some(bar) = self.bar.get() {
            bar.finish_with_message(format!(
                "Inserted {} documents ({} errored)",
                report.total_inserted, report.total_errored
            ));
        }
        LogReporter.load_finished(report);
    }

    fn verification_finished(&self, report: &VerificationReport) {
        LogReporter.verification_finished(report);
    }
}
