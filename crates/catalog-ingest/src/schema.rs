//! Declared column table for the product catalog
//!
//! Every typed column carries its kind and null policy here; the cleaner
//! consults this table instead of inferring types from cell contents.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Storage type a column is coerced to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Decimal,
    Text,
}

/// What happens when a cell is missing, a placeholder, or fails to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// The row is dropped
    Required,
    /// The value becomes null and the row is kept
    Nullable,
}

/// One declared column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub null_policy: NullPolicy,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, kind: ColumnKind, null_policy: NullPolicy) -> Self {
        Self {
            name,
            kind,
            null_policy,
        }
    }

    pub fn is_required(&self) -> bool {
        self.null_policy == NullPolicy::Required
    }
}

pub const ID: ColumnSpec = ColumnSpec::new("id", ColumnKind::Integer, NullPolicy::Required);
pub const COST: ColumnSpec = ColumnSpec::new("cost", ColumnKind::Decimal, NullPolicy::Nullable);
pub const CATEGORY: ColumnSpec =
    ColumnSpec::new("category", ColumnKind::Text, NullPolicy::Nullable);
pub const NAME: ColumnSpec = ColumnSpec::new("name", ColumnKind::Text, NullPolicy::Nullable);
pub const BRAND: ColumnSpec = ColumnSpec::new("brand", ColumnKind::Text, NullPolicy::Nullable);
pub const RETAIL_PRICE: ColumnSpec =
    ColumnSpec::new("retail_price", ColumnKind::Decimal, NullPolicy::Nullable);
pub const DEPARTMENT: ColumnSpec =
    ColumnSpec::new("department", ColumnKind::Text, NullPolicy::Nullable);
pub const SKU: ColumnSpec = ColumnSpec::new("sku", ColumnKind::Text, NullPolicy::Nullable);
pub const DISTRIBUTION_CENTER_ID: ColumnSpec = ColumnSpec::new(
    "distribution_center_id",
    ColumnKind::Integer,
    NullPolicy::Nullable,
);

/// Typed columns of the product catalog, in source file order
pub const PRODUCT_COLUMNS: [ColumnSpec; 9] = [
    ID,
    COST,
    CATEGORY,
    NAME,
    BRAND,
    RETAIL_PRICE,
    DEPARTMENT,
    SKU,
    DISTRIBUTION_CENTER_ID,
];

/// Look up a declared column by name
pub fn column(name: &str) -> Option<&'static ColumnSpec> {
    PRODUCT_COLUMNS.iter().find(|c| c.name == name)
}

/// Placeholder spellings that clean to null
///
/// Matches the NA spellings dataframe tooling writes when exporting missing
/// values, plus the empty string.
pub const DEFAULT_NULL_TOKENS: &[&str] = &[
    "", "nan", "NaN", "-nan", "-NaN", "NULL", "null", "None", "N/A", "NA", "n/a", "<NA>", "#N/A",
    "#NA",
];

/// Set of placeholder tokens, compared against trimmed cell values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullTokens(HashSet<String>);

impl NullTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: HashSet<String> = tokens.into_iter().map(Into::into).collect();
        // An all-whitespace cell is always null, whatever the configured list says
        set.insert(String::new());
        Self(set)
    }

    pub fn is_null(&self, trimmed: &str) -> bool {
        self.0.contains(trimmed)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for NullTokens {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_TOKENS.iter().copied())
    }
}
