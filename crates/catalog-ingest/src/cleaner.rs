//! Schema cleaning: raw rows to validated records
//!
//! Pure transform over the full row set. Numeric cells that fail to parse
//! become null; text cells are trimmed and placeholder tokens become null.
//! A row is dropped only when a `Required` column ends up null, which for
//! the catalog means a missing or unparseable `id`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

use crate::models::{RawRow, ValidatedRecord};
use crate::schema::{
    self, ColumnKind, ColumnSpec, NullTokens, BRAND, CATEGORY, COST, DEPARTMENT,
    DISTRIBUTION_CENTER_ID, ID, NAME, PRODUCT_COLUMNS, RETAIL_PRICE, SKU,
};

/// Line numbers of dropped rows kept in the summary
pub const MAX_REPORTED_DROPS: usize = 20;

/// Largest float that still maps onto an exact integer
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Output of [`SchemaCleaner::clean`]
#[derive(Debug, Clone)]
pub struct CleanResult {
    pub validated: Vec<ValidatedRecord>,
    pub summary: CleanSummary,
}

impl CleanResult {
    pub fn dropped_count(&self) -> usize {
        self.summary.dropped
    }
}

/// Counts describing a cleaning pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub dropped: usize,
    /// Source line numbers of the first dropped rows
    pub dropped_lines: Vec<usize>,
    /// Records whose `id` repeats an earlier record in the same file
    pub duplicate_ids: usize,
}

/// A single coerced cell
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Integer(Option<i64>),
    Decimal(Option<f64>),
    Text(Option<String>),
}

impl Cell {
    fn is_null(&self) -> bool {
        match self {
            Cell::Integer(v) => v.is_none(),
            Cell::Decimal(v) => v.is_none(),
            Cell::Text(v) => v.is_none(),
        }
    }
}

/// Coerced cells for one row, looked up by column
struct TypedRow(HashMap<&'static str, Cell>);

impl TypedRow {
    fn integer(&self, column: &ColumnSpec) -> Option<i64> {
        match self.0.get(column.name) {
            Some(Cell::Integer(v)) => *v,
            _ => None,
        }
    }

    fn decimal(&self, column: &ColumnSpec) -> Option<f64> {
        match self.0.get(column.name) {
            Some(Cell::Decimal(v)) => *v,
            _ => None,
        }
    }

    fn text(&mut self, column: &ColumnSpec) -> Option<String> {
        match self.0.remove(column.name) {
            Some(Cell::Text(v)) => v,
            _ => None,
        }
    }
}

/// Table-driven cleaner for catalog rows
#[derive(Debug, Clone)]
pub struct SchemaCleaner {
    columns: Vec<ColumnSpec>,
    null_tokens: NullTokens,
}

impl Default for SchemaCleaner {
    fn default() -> Self {
        Self::new(NullTokens::default())
    }
}

impl SchemaCleaner {
    pub fn new(null_tokens: NullTokens) -> Self {
        Self {
            columns: PRODUCT_COLUMNS.to_vec(),
            null_tokens,
        }
    }

    /// Clean every row; dropping is reported, never raised
    pub fn clean(&self, rows: Vec<RawRow>) -> CleanResult {
        let rows_in = rows.len();
        let mut validated = Vec::with_capacity(rows_in);
        let mut dropped_lines = Vec::new();
        let mut seen_ids = HashSet::with_capacity(rows_in);
        let mut duplicate_ids = 0;

        for row in &rows {
            match self.clean_row(row) {
                Some(record) => {
                    if !seen_ids.insert(record.id) {
                        duplicate_ids += 1;
                    }
                    validated.push(record);
                },
                None => dropped_lines.push(row.line),
            }
        }

        let dropped = rows_in - validated.len();
        if dropped > 0 {
            warn!(
                dropped,
                first_lines = ?&dropped_lines[..dropped_lines.len().min(5)],
                "Dropped rows with null or unparseable IDs"
            );
        }
        if duplicate_ids > 0 {
            warn!(
                duplicate_ids,
                "Input repeats some IDs; the unique index will reject the repeats"
            );
        }
        info!(rows_in, rows_out = validated.len(), "Data cleaning completed");

        dropped_lines.truncate(MAX_REPORTED_DROPS);

        CleanResult {
            summary: CleanSummary {
                rows_in,
                rows_out: validated.len(),
                dropped,
                dropped_lines,
                duplicate_ids,
            },
            validated,
        }
    }

    /// Clean one row, or `None` when a required column is null
    pub fn clean_row(&self, row: &RawRow) -> Option<ValidatedRecord> {
        let mut cells = HashMap::with_capacity(self.columns.len());
        for column in &self.columns {
            let cell = self.coerce(column, row.get(column.name));
            if column.is_required() && cell.is_null() {
                return None;
            }
            cells.insert(column.name, cell);
        }

        let passthrough: BTreeMap<String, Option<String>> = row
            .columns()
            .filter(|(name, _)| schema::column(name).is_none())
            .map(|(name, value)| {
                let value = (!self.null_tokens.is_null(value.trim())).then(|| value.to_string());
                (name.to_string(), value)
            })
            .collect();

        let mut typed = TypedRow(cells);
        Some(ValidatedRecord {
            id: typed.integer(&ID)?,
            cost: typed.decimal(&COST),
            retail_price: typed.decimal(&RETAIL_PRICE),
            distribution_center_id: typed.integer(&DISTRIBUTION_CENTER_ID),
            category: typed.text(&CATEGORY),
            name: typed.text(&NAME),
            brand: typed.text(&BRAND),
            department: typed.text(&DEPARTMENT),
            sku: typed.text(&SKU),
            passthrough,
        })
    }

    fn coerce(&self, column: &ColumnSpec, raw: Option<&str>) -> Cell {
        let trimmed = raw
            .map(str::trim)
            .filter(|value| !self.null_tokens.is_null(value));

        match column.kind {
            ColumnKind::Integer => Cell::Integer(trimmed.and_then(parse_integer)),
            ColumnKind::Decimal => Cell::Decimal(trimmed.and_then(parse_decimal)),
            ColumnKind::Text => Cell::Text(trimmed.map(str::to_string)),
        }
    }
}

/// Parse a finite decimal; anything else is null
pub fn parse_decimal(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integer, accepting float spellings with no fractional part ("3.0")
pub fn parse_integer(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(v) = value.parse::<i64>() {
        return Some(v);
    }

    let float = parse_decimal(value)?;
    if float.fract() == 0.0 && float.abs() <= MAX_EXACT_INTEGER {
        Some(float as i64)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(line: usize, pairs: &[(&str, &str)]) -> RawRow {
        RawRow::from_pairs(line, pairs.iter().copied())
    }

    #[test]
    fn test_numeric_coercion_keeps_row() {
        let cleaner = SchemaCleaner::default();

        let good = cleaner.clean_row(&row(2, &[("id", "1"), ("cost", "12.5")])).unwrap();
        assert_eq!(good.cost, Some(12.5));

        let bad = cleaner.clean_row(&row(3, &[("id", "2"), ("cost", "abc")])).unwrap();
        assert_eq!(bad.id, 2);
        assert_eq!(bad.cost, None);
    }

    #[test]
    fn test_string_normalization() {
        let cleaner = SchemaCleaner::default();
        let record = cleaner
            .clean_row(&row(
                2,
                &[
                    ("id", " 5 "),
                    ("brand", "  MG  "),
                    ("category", "nan"),
                    ("sku", "   "),
                    ("name", " nan "),
                ],
            ))
            .unwrap();

        assert_eq!(record.id, 5);
        assert_eq!(record.brand.as_deref(), Some("MG"));
        assert_eq!(record.category, None);
        assert_eq!(record.sku, None);
        assert_eq!(record.name, None);
        assert_eq!(record.department, None);
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("3.0"), Some(3));
        assert_eq!(parse_integer("1e3"), Some(1000));
        assert_eq!(parse_integer("3.5"), None);
        assert_eq!(parse_integer("nan"), None);
        assert_eq!(parse_integer("inf"), None);
        assert_eq!(parse_integer(""), None);
    }

    #[test]
    fn test_decimal_rejects_non_finite() {
        assert_eq!(parse_decimal("10.00"), Some(10.0));
        assert_eq!(parse_decimal(" 7 "), Some(7.0));
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("-inf"), None);
        assert_eq!(parse_decimal("$5"), None);
    }

    #[test]
    fn test_passthrough_columns() {
        let cleaner = SchemaCleaner::default();
        let record = cleaner
            .clean_row(&row(2, &[("id", "1"), ("color", " red "), ("size", "nan")]))
            .unwrap();

        assert_eq!(record.passthrough.get("color"), Some(&Some(" red ".to_string())));
        assert_eq!(record.passthrough.get("size"), Some(&None));
        assert!(!record.passthrough.contains_key("id"));
    }

    #[test]
    fn test_scenario_rows() {
        let rows = vec![
            row(
                2,
                &[
                    ("id", "1"),
                    ("cost", "10.00"),
                    ("retail_price", "20.00"),
                    ("category", "A"),
                ],
            ),
            row(3, &[("id", ""), ("cost", "5")]),
            row(4, &[("id", "2"), ("cost", "bad"), ("retail_price", "30")]),
        ];

        let result = SchemaCleaner::default().clean(rows);

        assert_eq!(result.dropped_count(), 1);
        assert_eq!(result.summary.dropped_lines, vec![3]);
        assert_eq!(result.validated.len(), 2);
        assert_eq!(result.validated[1].cost, None);
        assert_eq!(result.validated[1].retail_price, Some(30.0));
    }

    #[test]
    fn test_duplicate_ids_are_counted_not_dropped() {
        let rows = vec![
            row(2, &[("id", "1")]),
            row(3, &[("id", "1")]),
            row(4, &[("id", "1.0")]),
        ];

        let result = SchemaCleaner::default().clean(rows);

        assert_eq!(result.validated.len(), 3);
        assert_eq!(result.summary.duplicate_ids, 2);
        assert_eq!(result.dropped_count(), 0);
    }

    #[test]
    fn test_custom_null_tokens() {
        let cleaner = SchemaCleaner::new(NullTokens::new(["missing"]));
        let record = cleaner
            .clean_row(&row(2, &[("id", "1"), ("brand", "missing"), ("sku", "nan")]))
            .unwrap();

        assert_eq!(record.brand, None);
        assert_eq!(record.sku.as_deref(), Some("nan"));
    }

    fn id_cell() -> impl Strategy<Value = String> {
        prop_oneof![
            (0i64..1_000_000).prop_map(|v| v.to_string()),
            Just(String::new()),
            Just("nan".to_string()),
            "[a-z]{1,6}",
            (0i64..1000).prop_map(|v| format!("{v}.5")),
        ]
    }

    proptest! {
        #[test]
        fn prop_dropped_count_matches_rejected_ids(
            ids in proptest::collection::vec(id_cell(), 0..60),
            cost in "[0-9a-z.]{0,6}",
        ) {
            let rows: Vec<RawRow> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| row(i + 2, &[("id", id.as_str()), ("cost", cost.as_str())]))
                .collect();

            let result = SchemaCleaner::default().clean(rows.clone());

            prop_assert_eq!(result.dropped_count(), rows.len() - result.validated.len());
            prop_assert_eq!(result.summary.rows_in, rows.len());

            let expected_drops = ids.iter().filter(|id| parse_integer(id).is_none()).count();
            prop_assert_eq!(result.dropped_count(), expected_drops);

            for record in &result.validated {
                if let Some(cost) = record.cost {
                    prop_assert!(cost.is_finite());
                }
            }
        }
    }
}
