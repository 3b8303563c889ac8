//! Product catalog row models

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::store::Document;

/// One untyped source line, keyed by header name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file (the header is line 1)
    pub line: usize,
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            cells: HashMap::new(),
        }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, K, V>(line: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            line,
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Typed projection of a [`RawRow`]; `id` is always present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub id: i64,
    pub cost: Option<f64>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub retail_price: Option<f64>,
    pub department: Option<String>,
    pub sku: Option<String>,
    pub distribution_center_id: Option<i64>,
    /// Columns outside the declared schema, passed through as strings
    #[serde(flatten)]
    pub passthrough: BTreeMap<String, Option<String>>,
}

impl ValidatedRecord {
    /// A record with only `id` set
    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            cost: None,
            category: None,
            name: None,
            brand: None,
            retail_price: None,
            department: None,
            sku: None,
            distribution_center_id: None,
            passthrough: BTreeMap::new(),
        }
    }

    /// Document shape written to the store
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "record {} serialized to a non-object value: {}",
                self.id, other
            ))),
        }
    }
}
