//! Ingest configuration
//!
//! Values come from `CATALOG_*` environment variables (a `.env` file is read
//! first) with the defaults below; CLI flags override them afterwards.

use catalog_common::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{NullTokens, DEFAULT_NULL_TOKENS};
use crate::store::{is_plain_identifier, redact_uri, StoreTarget};

/// Default store URI (local MongoDB).
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Default database name.
pub const DEFAULT_DATABASE: &str = "products_db";

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "products";

/// Default input file.
pub const DEFAULT_INPUT: &str = "archive/products.csv";

/// Default documents per bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = crate::loader::DEFAULT_BATCH_SIZE;

/// Default number of batches in flight.
pub const DEFAULT_CONCURRENCY: usize = crate::loader::DEFAULT_CONCURRENCY;

/// Default number of sample documents in the verification report.
pub const DEFAULT_SAMPLE_SIZE: usize = crate::verifier::DEFAULT_SAMPLE_SIZE;

/// Default field delimiter.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Default connect and server selection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub load: LoadConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub input: PathBuf,
    pub delimiter: u8,
    pub null_tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub batch_size: usize,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub enabled: bool,
    pub sample_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                uri: DEFAULT_URI.to_string(),
                database: DEFAULT_DATABASE.to_string(),
                collection: DEFAULT_COLLECTION.to_string(),
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            source: SourceConfig {
                input: PathBuf::from(DEFAULT_INPUT),
                delimiter: DEFAULT_DELIMITER,
                null_tokens: DEFAULT_NULL_TOKENS.iter().map(|t| t.to_string()).collect(),
            },
            load: LoadConfig {
                batch_size: DEFAULT_BATCH_SIZE,
                concurrency: DEFAULT_CONCURRENCY,
            },
            verify: VerifyConfig {
                enabled: true,
                sample_size: DEFAULT_SAMPLE_SIZE,
            },
        }
    }
}

impl IngestConfig {
    /// Load from the process environment after reading `.env`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(uri) = lookup("CATALOG_MONGO_URI") {
            config.store.uri = uri;
        }
        if let Some(database) = lookup("CATALOG_DATABASE") {
            config.store.database = database;
        }
        if let Some(collection) = lookup("CATALOG_COLLECTION") {
            config.store.collection = collection;
        }
        if let Some(secs) = lookup("CATALOG_CONNECT_TIMEOUT_SECS") {
            config.store.connect_timeout_secs =
                parse_number("CATALOG_CONNECT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(input) = lookup("CATALOG_INPUT") {
            config.source.input = PathBuf::from(input);
        }
        if let Some(delimiter) = lookup("CATALOG_DELIMITER") {
            config.source.delimiter = parse_delimiter(&delimiter)?;
        }
        if let Some(tokens) = lookup("CATALOG_NULL_TOKENS") {
            config.source.null_tokens = tokens.split(',').map(|t| t.trim().to_string()).collect();
        }
        if let Some(size) = lookup("CATALOG_BATCH_SIZE") {
            config.load.batch_size = parse_number("CATALOG_BATCH_SIZE", &size)?;
        }
        if let Some(concurrency) = lookup("CATALOG_CONCURRENCY") {
            config.load.concurrency = parse_number("CATALOG_CONCURRENCY", &concurrency)?;
        }
        if let Some(size) = lookup("CATALOG_SAMPLE_SIZE") {
            config.verify.sample_size = parse_number("CATALOG_SAMPLE_SIZE", &size)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.uri.trim().is_empty() {
            return Err(CatalogError::Config("store URI cannot be empty".to_string()));
        }
        if self.store.database.trim().is_empty() {
            return Err(CatalogError::Config("database name cannot be empty".to_string()));
        }
        if !is_plain_identifier(&self.store.collection) {
            return Err(CatalogError::Config(format!(
                "collection name '{}' must use only letters, digits and underscores",
                self.store.collection
            )));
        }
        if self.load.batch_size == 0 {
            return Err(CatalogError::Config("batch size must be greater than 0".to_string()));
        }
        if self.load.concurrency == 0 {
            return Err(CatalogError::Config("concurrency must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn store_target(&self) -> StoreTarget {
        StoreTarget {
            uri: self.store.uri.clone(),
            database: self.store.database.clone(),
            collection: self.store.collection.clone(),
            connect_timeout: Duration::from_secs(self.store.connect_timeout_secs),
        }
    }

    pub fn null_tokens(&self) -> NullTokens {
        NullTokens::new(self.source.null_tokens.iter().cloned())
    }

    /// URI with any password masked, for logs
    pub fn redacted_uri(&self) -> String {
        redact_uri(&self.store.uri)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            CatalogError::Config(format!("{key} must be a non-negative integer, got '{value}'"))
        })
}

/// A single ASCII character, or `\t`/`tab` for tab-separated input
pub fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(CatalogError::Config(format!(
            "delimiter must be a single ASCII character, got '{other}'"
        ))),
    }
}
