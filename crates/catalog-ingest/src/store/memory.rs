//! In-process document store
//!
//! Keeps documents in insertion order and enforces unique indexes the same
//! way a server would: a conflicting document is rejected on its own and the
//! rest of the batch still lands. Used for `--dry-run` and in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use super::{
    Document, DocumentStore, FieldStats, Filter, IndexOutcome, IndexSpec, InsertOutcome,
    StoreError, WriteFailure, DUPLICATE_KEY_CODE,
};

#[derive(Debug, Default)]
struct State {
    docs: Vec<Document>,
    indexes: HashMap<String, IndexSpec>,
    /// Serialized key values per unique field
    unique_keys: HashMap<String, HashSet<String>>,
}

impl State {
    fn key_of(doc: &Document, field: &str) -> String {
        doc.get(field).unwrap_or(&Value::Null).to_string()
    }
}

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored document
    pub fn documents(&self) -> Vec<Document> {
        self.lock().docs.clone()
    }

    /// Names of the indexes created so far
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().indexes.values().map(IndexSpec::name).collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-write
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<IndexOutcome, StoreError> {
        let mut state = self.lock();
        let name = index.name();

        if let Some(existing) = state.indexes.get(&name) {
            return index.check_existing(&name, existing.unique);
        }

        if index.unique {
            let mut keys = HashSet::with_capacity(state.docs.len());
            for doc in &state.docs {
                let key = State::key_of(doc, &index.field);
                if !keys.insert(key.clone()) {
                    return Err(StoreError::Index(format!(
                        "cannot build unique index {name}: duplicate key {key}"
                    )));
                }
            }
            state.unique_keys.insert(index.field.clone(), keys);
        }

        state.indexes.insert(name, index.clone());
        Ok(IndexOutcome::Created)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let removed = state.docs.len() as u64;
        state.docs.clear();
        for keys in state.unique_keys.values_mut() {
            keys.clear();
        }
        Ok(removed)
    }

    async fn insert_unordered(&self, docs: Vec<Document>) -> Result<InsertOutcome, StoreError> {
        let mut state = self.lock();
        let mut outcome = InsertOutcome::default();
        let unique_fields: Vec<String> = state.unique_keys.keys().cloned().collect();

        for (index, doc) in docs.into_iter().enumerate() {
            let conflict = unique_fields.iter().find_map(|field| {
                let key = State::key_of(&doc, field);
                state
                    .unique_keys
                    .get(field)
                    .filter(|keys| keys.contains(&key))
                    .map(|_| (field.clone(), key))
            });

            if let Some((field, key)) = conflict {
                outcome.failures.push(WriteFailure {
                    index,
                    code: Some(DUPLICATE_KEY_CODE),
                    message: format!("duplicate key on {field}_1: {key}"),
                });
                continue;
            }

            for field in &unique_fields {
                let key = State::key_of(&doc, field);
                if let Some(keys) = state.unique_keys.get_mut(field) {
                    keys.insert(key);
                }
            }
            state.docs.push(doc);
            outcome.inserted += 1;
        }

        Ok(outcome)
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let state = self.lock();
        let count = match filter {
            Some(filter) => state.docs.iter().filter(|doc| filter.matches(doc)).count(),
            None => state.docs.len(),
        };
        Ok(count as u64)
    }

    async fn find_first(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        Ok(self.lock().docs.iter().take(limit).cloned().collect())
    }

    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let values: BTreeSet<String> = state
            .docs
            .iter()
            .filter_map(|doc| doc.get(field).and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(values.into_iter().collect())
    }

    async fn numeric_stats(&self, field: &str) -> Result<FieldStats, StoreError> {
        let state = self.lock();
        Ok(FieldStats::from_values(
            state
                .docs
                .iter()
                .filter_map(|doc| doc.get(field).and_then(Value::as_f64)),
        ))
    }
}
