//! Row iteration over delimited and JSON lines files
//!
//! Both iterators are lazy and forward-only. They yield [`Row`]s carrying the
//! raw record and its 1-based physical line number, and fail per file with a
//! [`FileError`] rather than aborting the run.

mod delimited;
mod dialect;
mod jsonl;
mod preprocess;

use std::collections::HashSet;

use encoding_rs::{Encoding, UTF_8};

use crate::Record;
use crate::config::TableSpec;
use crate::error::{FileError, TapError, TapResult};

pub use delimited::CsvRowIterator;
pub use dialect::{DELIMITER_CANDIDATES, Dialect, MAX_DIALECT_LINES, QUOTE_CANDIDATES, sniff_dialect};
pub use jsonl::JsonlRowIterator;
pub use preprocess::{LinePreprocessor, PreprocessOptions};

/// One raw record and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based physical line of the record's first line
    pub line_number: u64,
    pub record: Record,
}

/// Boxed row iterator over any supported file kind
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row, FileError>> + 'a>;

/// Parsing options for one table's files
#[derive(Debug, Clone)]
pub struct RowOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: Option<u8>,
    pub has_header: bool,
    pub skip_header_row: usize,
    pub skip_footer_row: usize,
    pub encoding: &'static Encoding,
    /// Yield empty rows as all-null records instead of skipping them
    pub keep_empty_rows: bool,
    /// Fill missing trailing fields with null instead of leaving them out
    pub pad_short_rows: bool,
    /// Columns that must appear in every header
    pub key_properties: Vec<String>,
    pub date_overrides: Vec<String>,
}

impl Default for RowOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: Some(b'\\'),
            has_header: true,
            skip_header_row: 0,
            skip_footer_row: 0,
            encoding: UTF_8,
            keep_empty_rows: false,
            pad_short_rows: false,
            key_properties: Vec::new(),
            date_overrides: Vec::new(),
        }
    }
}

impl RowOptions {
    /// Options for a validated table
    ///
    /// A delimiter or quote left empty for detection falls back to `,` / `"`;
    /// detect the dialect first to fill them in.
    pub fn from_table(table: &TableSpec) -> TapResult<Self> {
        let encoding = Encoding::for_label(table.encoding.trim().as_bytes()).ok_or_else(|| {
            TapError::Config(format!(
                "unknown encoding {:?} for table {}",
                table.encoding, table.table_name
            ))
        })?;
        Ok(Self {
            delimiter: table.delimiter_byte().unwrap_or(b','),
            quote: table.quote_byte().unwrap_or(b'"'),
            escape: table.escape_byte(),
            has_header: table.has_header,
            skip_header_row: table.skip_header_row,
            skip_footer_row: table.skip_footer_row,
            encoding,
            keep_empty_rows: table.keep_empty_rows,
            pad_short_rows: table.pad_short_rows,
            key_properties: table.key_properties.clone(),
            date_overrides: table.date_overrides.clone(),
        })
    }
}

/// Fail when key properties or date overrides are missing from `columns`
pub(crate) fn check_required_columns(
    path: &str,
    columns: &[String],
    options: &RowOptions,
) -> TapResult<()> {
    let available: HashSet<&str> = columns.iter().map(String::as_str).collect();
    for required in [&options.key_properties, &options.date_overrides] {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !available.contains(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TapError::MissingHeaders {
                path: path.to_string(),
                missing,
                available: columns.to_vec(),
            });
        }
    }
    Ok(())
}
