//! Tap configuration
//!
//! A config document names the bucket, the bookmark start date and the tables
//! to extract:
//!
//! ```json
//! {
//!   "bucket": "exports",
//!   "start_date": "2024-01-01T00:00:00Z",
//!   "tables": [
//!     {
//!       "table_name": "orders",
//!       "search_prefix": "orders/",
//!       "search_pattern": "\\.csv$",
//!       "key_properties": "id",
//!       "date_overrides": ["created_at"]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{TapError, TapResult};
use crate::transform::IntegerDatetimeMode;

/// Order in which a table's files are synced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest modification first (bookmark friendly)
    #[default]
    LastModified,
    /// Lexical key order
    Key,
}

/// Main tap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// Bucket to read from
    pub bucket: String,
    /// Bookmark used for tables without state
    #[serde(default)]
    pub start_date: DateTime<Utc>,
    /// Table definitions (a list, or a JSON-encoded string holding one)
    #[serde(deserialize_with = "deserialize_tables")]
    pub tables: Vec<TableSpec>,
    /// File ordering during sync
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Keep every n-th record while sampling
    #[serde(default = "default_sample_rate")]
    pub sample_rate: usize,
    /// Records sampled per file
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Files sampled per table
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// AWS region (S3 store)
    #[serde(default)]
    pub region: Option<String>,
    /// AWS profile name (S3 store)
    #[serde(default)]
    pub aws_profile: Option<String>,
    /// Endpoint URL for S3-compatible storage
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,
    /// How integers in date-time columns are read during sync
    #[serde(default)]
    pub integer_datetime_fmt: IntegerDatetimeMode,
}

fn default_sample_rate() -> usize {
    5
}

fn default_max_records() -> usize {
    1000
}

fn default_max_files() -> usize {
    5
}

impl TapConfig {
    /// Create a config for a bucket with no tables
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            start_date: DateTime::<Utc>::default(),
            tables: Vec::new(),
            sort_order: SortOrder::default(),
            sample_rate: default_sample_rate(),
            max_records: default_max_records(),
            max_files: default_max_files(),
            region: None,
            aws_profile: None,
            aws_endpoint_url: None,
            integer_datetime_fmt: IntegerDatetimeMode::default(),
        }
    }

    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> TapResult<Self> {
        let config: TapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML config document
    pub fn from_yaml_str(yaml: &str) -> TapResult<Self> {
        let config: TapConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TapError::Config(format!("YAML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    ///
    /// `.yaml` / `.yml` files are read as YAML, everything else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> TapResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Add a table
    pub fn with_table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    /// Set the start date
    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }

    /// Set the sync file ordering
    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Set the sampling limits
    pub fn with_sampling(mut self, sample_rate: usize, max_records: usize, max_files: usize) -> Self {
        self.sample_rate = sample_rate;
        self.max_records = max_records;
        self.max_files = max_files;
        self
    }

    /// Set how integers in date-time columns are read
    pub fn with_integer_datetime(mut self, mode: IntegerDatetimeMode) -> Self {
        self.integer_datetime_fmt = mode;
        self
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> TapResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(TapError::Config("bucket must not be empty".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(TapError::Config("sample_rate must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.table_name.as_str()) {
                return Err(TapError::Config(format!(
                    "duplicate table name: {}",
                    table.table_name
                )));
            }
            table.validate()?;
        }
        Ok(())
    }

    /// S3 connection settings derived from this config
    #[cfg(feature = "s3")]
    pub fn s3_source(&self) -> crate::storage::S3Source {
        let mut source = crate::storage::S3Source::new(self.bucket.clone());
        if let Some(region) = &self.region {
            source = source.with_region(region.clone());
        }
        if let Some(profile) = &self.aws_profile {
            source = source.with_profile(profile.clone());
        }
        if let Some(endpoint) = &self.aws_endpoint_url {
            source = source.with_endpoint(endpoint.clone());
        }
        source
    }
}

/// Definition of one extracted table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Stream name
    pub table_name: String,
    /// Regex matched against object keys
    pub search_pattern: String,
    /// Listing prefix
    #[serde(default)]
    pub search_prefix: Option<String>,
    /// Primary key columns
    #[serde(default, deserialize_with = "deserialize_name_list")]
    pub key_properties: Vec<String>,
    /// Columns always typed as date-time
    #[serde(default, deserialize_with = "deserialize_name_list")]
    pub date_overrides: Vec<String>,
    /// Field delimiter; empty means detect from the data
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Quote character; empty means detect from the data
    #[serde(default = "default_quotechar")]
    pub quotechar: String,
    /// Escape character inside quoted fields; empty disables escapes
    #[serde(default = "default_escape_char")]
    pub escape_char: String,
    /// Whether the first row names the columns
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// Lines dropped before the header
    #[serde(default)]
    pub skip_header_row: usize,
    /// Lines dropped at the end of the file
    #[serde(default)]
    pub skip_footer_row: usize,
    /// Source text encoding label
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Match keys nested below the search prefix
    #[serde(default = "default_true")]
    pub recursive_search: bool,
    /// Yield empty CSV rows as all-null records
    #[serde(default)]
    pub keep_empty_rows: bool,
    /// Fill missing trailing CSV fields with null
    #[serde(default)]
    pub pad_short_rows: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_quotechar() -> String {
    "\"".to_string()
}

fn default_escape_char() -> String {
    "\\".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_true() -> bool {
    true
}

impl TableSpec {
    /// Create a table with default dialect settings
    pub fn new(table_name: impl Into<String>, search_pattern: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            search_pattern: search_pattern.into(),
            search_prefix: None,
            key_properties: Vec::new(),
            date_overrides: Vec::new(),
            delimiter: default_delimiter(),
            quotechar: default_quotechar(),
            escape_char: default_escape_char(),
            has_header: true,
            skip_header_row: 0,
            skip_footer_row: 0,
            encoding: default_encoding(),
            recursive_search: true,
            keep_empty_rows: false,
            pad_short_rows: false,
        }
    }

    /// Set the listing prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.search_prefix = Some(prefix.into());
        self
    }

    /// Set the key properties
    pub fn with_key_properties<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_properties = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the date-time override columns
    pub fn with_date_overrides<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_overrides = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Set the quote character
    pub fn with_quotechar(mut self, quotechar: impl Into<String>) -> Self {
        self.quotechar = quotechar.into();
        self
    }

    /// Set whether the first row is a header
    pub fn with_has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Set the number of leading and trailing lines to drop
    pub fn with_skipped_rows(mut self, header: usize, footer: usize) -> Self {
        self.skip_header_row = header;
        self.skip_footer_row = footer;
        self
    }

    /// Set the source encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Set recursive matching below the prefix
    pub fn with_recursive_search(mut self, recursive: bool) -> Self {
        self.recursive_search = recursive;
        self
    }

    /// Keep empty CSV rows
    pub fn with_keep_empty_rows(mut self, keep: bool) -> Self {
        self.keep_empty_rows = keep;
        self
    }

    /// Pad short CSV rows with nulls
    pub fn with_pad_short_rows(mut self, pad: bool) -> Self {
        self.pad_short_rows = pad;
        self
    }

    /// Compiled search pattern
    pub fn pattern(&self) -> TapResult<Regex> {
        Regex::new(&self.search_pattern).map_err(|e| {
            TapError::Config(format!(
                "invalid search_pattern for table {}: {e}",
                self.table_name
            ))
        })
    }

    /// Delimiter byte, or None when it should be detected
    pub fn delimiter_byte(&self) -> Option<u8> {
        single_byte(&self.delimiter)
    }

    /// Quote byte, or None when it should be detected
    pub fn quote_byte(&self) -> Option<u8> {
        single_byte(&self.quotechar)
    }

    /// Escape byte, or None when escapes are disabled
    pub fn escape_byte(&self) -> Option<u8> {
        single_byte(&self.escape_char)
    }

    /// Whether the dialect must be detected from the data
    pub fn needs_dialect_detection(&self) -> bool {
        self.delimiter.is_empty() || self.quotechar.is_empty()
    }

    /// Validate a single table definition
    pub fn validate(&self) -> TapResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(TapError::Config("table_name must not be empty".to_string()));
        }
        self.pattern()?;

        for (field, value) in [
            ("delimiter", &self.delimiter),
            ("quotechar", &self.quotechar),
            ("escape_char", &self.escape_char),
        ] {
            if !value.is_empty() && single_byte(value).is_none() {
                return Err(TapError::Config(format!(
                    "{field} for table {} must be a single ASCII character, got {value:?}",
                    self.table_name
                )));
            }
        }

        if encoding_rs::Encoding::for_label(self.encoding.trim().as_bytes()).is_none() {
            return Err(TapError::Config(format!(
                "unknown encoding {:?} for table {}",
                self.encoding, self.table_name
            )));
        }
        Ok(())
    }
}

fn single_byte(value: &str) -> Option<u8> {
    match value.as_bytes() {
        [b] if b.is_ascii() => Some(*b),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    Joined(String),
    List(Vec<String>),
}

/// Accept `"a, b"` or `["a", "b"]`
fn deserialize_name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match Option::<NameList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(NameList::Joined(joined)) => joined.split(',').map(str::to_string).collect(),
        Some(NameList::List(list)) => list,
    };
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TableList {
    Encoded(String),
    List(Vec<TableSpec>),
}

fn deserialize_tables<'de, D>(deserializer: D) -> Result<Vec<TableSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    match TableList::deserialize(deserializer)? {
        TableList::List(tables) => Ok(tables),
        TableList::Encoded(json) => serde_json::from_str(&json).map_err(serde::de::Error::custom),
    }
}
