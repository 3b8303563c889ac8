//! End-to-end pipeline runs against in-process stores

mod common;

use catalog_ingest::config::IngestConfig;
use catalog_ingest::indexes::IndexStatus;
use catalog_ingest::loader::batch_count;
use catalog_ingest::pipeline::{Pipeline, PipelineError, PipelineState};
use catalog_ingest::store::{DocumentStore, MemoryStore};
use common::{catalog_lines, write_csv, FaultyStore, RecordingReporter};
use std::sync::Arc;

fn config_for(input: &std::path::Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.source.input = input.to_path_buf();
    config.store.uri = "memory://".to_string();
    config
}

#[tokio::test]
async fn test_scenario_drop_null_cost_and_aggregate() {
    let file = write_csv(&[
        "1,10.00,A,Scarf,MG,20.00,Women,S1,1",
        ",5,B,Hat,MG,9.00,Men,S2,1",
        "2,bad,C,Belt,Levi,30,Men,S3,2",
    ]);
    let store = Arc::new(MemoryStore::new());
    let reporter = Arc::new(RecordingReporter::default());

    let mut pipeline =
        Pipeline::new(config_for(file.path()), reporter.clone()).with_store(store.clone());
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.clean.dropped, 1);
    assert_eq!(outcome.clean.dropped_lines, vec![3]);
    assert_eq!(outcome.total_inserted(), 2);

    let verification = outcome.verification.unwrap();
    assert_eq!(verification.total_count, Some(2));
    let cost = verification.cost.unwrap();
    assert_eq!(cost.min, Some(10.0));
    assert_eq!(cost.max, Some(10.0));
    assert_eq!(cost.avg, Some(10.0));
    assert_eq!(cost.count, 1);

    let stored = store.documents();
    let row3 = stored.iter().find(|d| d["id"] == 2).unwrap();
    assert!(row3["cost"].is_null());

    assert_eq!(
        reporter.states(),
        vec![
            PipelineState::Connected,
            PipelineState::IndexesReady,
            PipelineState::Loading,
            PipelineState::Loaded,
            PipelineState::Verified,
        ]
    );
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let lines = catalog_lines(120);
    let file = write_csv(&lines.iter().map(String::as_str).collect::<Vec<_>>());
    let store = Arc::new(MemoryStore::new());

    let mut config = config_for(file.path());
    config.load.batch_size = 25;

    let first = Pipeline::new(config.clone(), Arc::new(RecordingReporter::default()))
        .with_store(store.clone())
        .run()
        .await
        .unwrap();
    let second = Pipeline::new(config, Arc::new(RecordingReporter::default()))
        .with_store(store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(second.load.truncated, Some(120));
    assert_eq!(second.total_inserted(), 120);
    assert_eq!(second.load.total_errored, 0);

    let (a, b) = (first.verification.unwrap(), second.verification.unwrap());
    assert_eq!(a.total_count, b.total_count);
    assert_eq!(a.cost, b.cost);
    assert_eq!(a.retail_price, b.retail_price);
    assert_eq!(a.categories, b.categories);
    assert_eq!(a.sanity_counts, b.sanity_counts);
    assert_eq!(first.source.sha256, second.source.sha256);
}

#[tokio::test]
async fn test_in_file_duplicates_are_isolated() {
    let file = write_csv(&[
        "1,1,A,a,MG,1,D,S1,1",
        "2,1,A,b,MG,1,D,S2,1",
        "1,1,A,c,MG,1,D,S3,1",
        "3,1,A,d,MG,1,D,S4,1",
        "4,1,A,e,MG,1,D,S5,1",
    ]);
    let mut config = config_for(file.path());
    config.load.batch_size = 4;

    let store = Arc::new(MemoryStore::new());
    let outcome = Pipeline::new(config, Arc::new(RecordingReporter::default()))
        .with_store(store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.clean.duplicate_ids, 1);
    assert_eq!(outcome.load.batches[0].inserted, 3);
    assert_eq!(outcome.load.batches[0].errored, 1);
    assert_eq!(outcome.load.batches[1].inserted, 1);
    assert_eq!(outcome.total_inserted(), 4);
    assert_eq!(store.count(None).await.unwrap(), 4);
    // The first copy wins
    let first = store
        .documents()
        .into_iter()
        .find(|d| d["id"] == 1)
        .unwrap();
    assert_eq!(first["name"], "a");
}

#[tokio::test]
async fn test_batch_partitioning_accounts_for_every_record() {
    let lines = catalog_lines(1001);
    let file = write_csv(&lines.iter().map(String::as_str).collect::<Vec<_>>());
    let mut config = config_for(file.path());
    config.load.batch_size = 100;
    config.load.concurrency = 4;

    let reporter = Arc::new(RecordingReporter::default());
    let outcome = Pipeline::new(config, reporter.clone())
        .with_store(Arc::new(MemoryStore::new()))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.load.batch_count(), batch_count(1001, 100));
    assert_eq!(outcome.load.batch_count(), 11);
    assert_eq!(outcome.load.batches.last().unwrap().size, 1);
    let accounted: usize = outcome
        .load
        .batches
        .iter()
        .map(|b| b.inserted + b.errored)
        .sum();
    assert_eq!(accounted, 1001);
    assert_eq!(reporter.batch_numbers(), (1..=11).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_index_failure_is_not_fatal() {
    let file = write_csv(&["1,1,A,a,MG,60,D,S1,1", "2,1,A,b,MG,1,D,S2,1"]);
    let mut store = FaultyStore::new();
    store.fail_index_fields.insert("brand".to_string());
    let store = Arc::new(store);

    let outcome = Pipeline::new(config_for(file.path()), Arc::new(RecordingReporter::default()))
        .with_store(store.clone())
        .run()
        .await
        .unwrap();

    let failed: Vec<_> = outcome.indexes.failed().map(|e| e.field.as_str()).collect();
    assert_eq!(failed, vec!["brand"]);
    assert!(matches!(
        outcome.indexes.entries[0].status,
        IndexStatus::Created
    ));
    assert_eq!(outcome.total_inserted(), 2);
    assert_eq!(outcome.state, PipelineState::Verified);
}

#[tokio::test]
async fn test_verification_failure_keeps_loaded_state() {
    let file = write_csv(&["1,10,A,a,MG,60,D,S1,1", "2,20,A,b,MG,1,D,S2,1"]);
    let mut store = FaultyStore::new();
    store.fail_stats_fields.insert("cost".to_string());

    let reporter = Arc::new(RecordingReporter::default());
    let mut pipeline =
        Pipeline::new(config_for(file.path()), reporter.clone()).with_store(Arc::new(store));
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, PipelineState::Loaded);
    assert!(outcome.succeeded());

    let verification = outcome.verification.unwrap();
    assert!(!verification.complete);
    assert_eq!(verification.failures.len(), 1);
    assert_eq!(verification.failures[0].check, "stats_cost");
    assert!(verification.cost.is_none());
    // Checks after the failing one still ran
    assert!(verification.retail_price.is_some());
    assert_eq!(verification.sanity_counts["retail_price_gt_50"], 1);
    assert_eq!(verification.total_count, Some(2));
}

#[tokio::test]
async fn test_connection_failure_aborts_before_truncating() {
    let file = write_csv(&["1,10,A,a,MG,60,D,S1,1"]);
    let mut store = FaultyStore::new();
    store.fail_ping = true;
    let store = Arc::new(store);

    let reporter = Arc::new(RecordingReporter::default());
    let mut pipeline =
        Pipeline::new(config_for(file.path()), reporter.clone()).with_store(store.clone());
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Connection(_)));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(store.delete_calls(), 0);
    assert_eq!(reporter.states(), vec![PipelineState::Failed]);
}

#[tokio::test]
async fn test_rejected_batch_does_not_stop_the_load() {
    let lines = catalog_lines(10);
    let file = write_csv(&lines.iter().map(String::as_str).collect::<Vec<_>>());
    let mut config = config_for(file.path());
    config.load.batch_size = 4;

    let mut store = FaultyStore::new();
    store.fail_insert_calls.insert(2);
    store.fail_delete = true;

    let outcome = Pipeline::new(config, Arc::new(RecordingReporter::default()))
        .with_store(Arc::new(store))
        .run()
        .await
        .unwrap();

    assert!(outcome.load.truncate_error.is_some());
    assert_eq!(outcome.load.batch_count(), 3);
    let rejected = outcome
        .load
        .batches
        .iter()
        .filter(|b| b.batch_error.is_some())
        .count();
    assert_eq!(rejected, 1);
    assert_eq!(outcome.total_inserted(), 6);
    assert_eq!(outcome.load.total_errored, 4);
    assert!(!outcome.load.is_complete());
}

#[tokio::test]
async fn test_write_concern_error_keeps_written_documents() {
    let file = write_csv(&[
        "1,10,A,a,MG,60,D,S1,1",
        "2,11,A,b,MG,61,D,S2,1",
        "1,12,A,c,MG,62,D,S3,1",
        "3,13,B,d,Levi,63,D,S4,2",
        "4,14,B,e,Levi,64,D,S5,2",
    ]);
    let mut config = config_for(file.path());
    config.load.batch_size = 3;

    let mut store = FaultyStore::new();
    store.write_concern_calls.insert(1);
    let store = Arc::new(store);

    let outcome = Pipeline::new(config, Arc::new(RecordingReporter::default()))
        .with_store(store.clone())
        .run()
        .await
        .unwrap();

    let first = &outcome.load.batches[0];
    assert_eq!((first.size, first.inserted, first.errored), (3, 2, 1));
    assert_eq!(first.failures[0].position, 2);
    assert!(first.batch_error.as_deref().unwrap().contains("write concern"));

    let second = &outcome.load.batches[1];
    assert_eq!((second.inserted, second.errored), (2, 0));
    assert!(second.batch_error.is_none());

    assert_eq!(outcome.total_inserted(), 4);
    assert!(outcome.succeeded());
    assert!(!outcome.load.is_complete());
    assert_eq!(store.inner.count(None).await.unwrap(), 4);
}

#[tokio::test]
async fn test_unknown_scheme_is_a_connection_error() {
    let file = write_csv(&["1,10,A,a,MG,60,D,S1,1"]);
    let mut config = config_for(file.path());
    config.store.uri = "couchdb://localhost:5984".to_string();

    let mut pipeline = Pipeline::new(config, Arc::new(RecordingReporter::default()));
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Connection(_)));
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[tokio::test]
async fn test_memory_uri_runs_without_injected_store() {
    let file = write_csv(&["1,10,A,a,MG,60,D,S1,1", "x,10,A,a,MG,60,D,S1,1"]);

    let outcome = Pipeline::new(config_for(file.path()), Arc::new(RecordingReporter::default()))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.total_inserted(), 1);
    assert_eq!(outcome.load.rows_read, 2);
    assert_eq!(outcome.load.rows_dropped, 1);
}

#[tokio::test]
async fn test_all_rows_dropped_inserts_nothing() {
    let file = write_csv(&[",10,A,a,MG,60,D,S1,1", "nan,1,A,a,MG,1,D,S1,1"]);

    let outcome = Pipeline::new(config_for(file.path()), Arc::new(RecordingReporter::default()))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.total_inserted(), 0);
    assert!(!outcome.succeeded());
    assert_eq!(outcome.load.batch_count(), 0);
}
