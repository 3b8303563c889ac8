//! Delimited source file reader
//!
//! Reads the whole catalog file into [`RawRow`]s and fingerprints the bytes
//! in the same pass. Rows may be shorter or longer than the header; missing
//! cells are simply absent from the row.

use catalog_common::checksum::HashingReader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::models::RawRow;
use crate::schema::PRODUCT_COLUMNS;

/// Errors raised while reading the input file
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input: {0}")]
    Csv(#[from] csv::Error),

    #[error("input is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// Everything read from one input file
#[derive(Debug, Clone)]
pub struct SourceData {
    pub summary: SourceSummary,
    pub rows: Vec<RawRow>,
}

/// Metadata about the input, kept in the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub path: Option<PathBuf>,
    pub headers: Vec<String>,
    pub rows: usize,
    pub bytes: u64,
    /// SHA-256 of the raw input bytes
    pub sha256: String,
}

/// CSV reader configured with a delimiter and the required header set
#[derive(Debug, Clone)]
pub struct SourceReader {
    delimiter: u8,
    required: Vec<String>,
}

impl Default for SourceReader {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl SourceReader {
    /// Reader that requires every declared catalog column
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            required: PRODUCT_COLUMNS.iter().map(|c| c.name.to_string()).collect(),
        }
    }

    /// Read and fingerprint a file on disk
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn read_path(&self, path: impl AsRef<Path>) -> Result<SourceData, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut data = self.read_from(BufReader::new(file))?;
        data.summary.path = Some(path.to_path_buf());

        info!(
            rows = data.summary.rows,
            columns = data.summary.headers.len(),
            sha256 = %data.summary.sha256,
            "Loaded input file"
        );
        debug!(headers = ?data.summary.headers, "Input columns");

        Ok(data)
    }

    /// Read from any byte source
    pub fn read_from<R: Read>(&self, reader: R) -> Result<SourceData, SourceError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(HashingReader::new(reader));

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        self.check_required(&headers)?;

        let mut rows = Vec::new();
        for (index, record) in csv_reader.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 2);

            let mut row = RawRow::new(line);
            for (column, value) in headers.iter().zip(record.iter()) {
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }

        let hashing = csv_reader.into_inner();
        let bytes = hashing.bytes_read();

        Ok(SourceData {
            summary: SourceSummary {
                path: None,
                rows: rows.len(),
                headers,
                bytes,
                sha256: hashing.finalize(),
            },
            rows,
        })
    }

    fn check_required(&self, headers: &[String]) -> Result<(), SourceError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|required| !headers.iter().any(|h| h == *required))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SourceError::MissingColumns(missing))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HEADER: &str = "id,cost,category,name,brand,retail_price,department,sku,distribution_center_id";

    #[test]
    fn test_reads_rows_with_line_numbers() {
        let input = format!(
            "{HEADER}\n1,10.00,Accessories,Scarf,MG,20.00,Women,SKU1,1\n2,5.5,Jeans,Slim,Levi,9.99,Men,SKU2,3\n"
        );
        let data = SourceReader::default()
            .read_from(Cursor::new(input.as_bytes()))
            .unwrap();

        assert_eq!(data.summary.rows, 2);
        assert_eq!(data.summary.headers.len(), 9);
        assert_eq!(data.summary.bytes, input.len() as u64);
        assert_eq!(data.summary.sha256.len(), 64);
        assert_eq!(data.rows[0].line, 2);
        assert_eq!(data.rows[1].line, 3);
        assert_eq!(data.rows[1].get("brand"), Some("Levi"));
    }

    #[test]
    fn test_short_rows_leave_cells_absent() {
        let input = format!("{HEADER}\n7,1.0\n");
        let data = SourceReader::default()
            .read_from(Cursor::new(input.into_bytes()))
            .unwrap();

        let row = &data.rows[0];
        assert_eq!(row.get("id"), Some("7"));
        assert_eq!(row.get("sku"), None);
    }

    #[test]
    fn test_extra_columns_are_kept() {
        let input = format!("{HEADER},color\n1,1,c,n,b,2,d,s,1,red\n");
        let data = SourceReader::default()
            .read_from(Cursor::new(input.into_bytes()))
            .unwrap();

        assert_eq!(data.rows[0].get("color"), Some("red"));
    }

    #[test]
    fn test_missing_required_columns() {
        let input = "id,cost,name\n1,2,x\n";
        let err = SourceReader::default()
            .read_from(Cursor::new(input.as_bytes()))
            .unwrap_err();

        match err {
            SourceError::MissingColumns(missing) => {
                assert!(missing.contains(&"brand".to_string()));
                assert!(missing.contains(&"retail_price".to_string()));
                assert!(!missing.contains(&"id".to_string()));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_delimiter() {
        let input = HEADER.replace(',', ";") + "\n1;2;c;n;b;3;d;s;4\n";
        let data = SourceReader::new(b';')
            .read_from(Cursor::new(input.into_bytes()))
            .unwrap();

        assert_eq!(data.rows[0].get("distribution_center_id"), Some("4"));
    }

    #[test]
    fn test_identical_files_share_a_fingerprint() {
        let input = format!("{HEADER}\n1,1,c,n,b,2,d,s,1\n");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(input.as_bytes()).unwrap();
        file.flush().unwrap();

        let reader = SourceReader::default();
        let first = reader.read_path(file.path()).unwrap();
        let second = reader.read_path(file.path()).unwrap();

        assert_eq!(first.summary.sha256, second.summary.sha256);
        assert_eq!(first.summary.path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file() {
        let err = SourceReader::default()
            .read_path("/nonexistent/products.csv")
            .unwrap_err();
        assert!(matches!(err, SourceError::Open { .. }));
    }
}
