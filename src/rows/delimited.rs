//! Delimited (CSV / TXT) row iterator

use std::collections::HashSet;
use std::io::Read;

use csv::{ReaderBuilder, StringRecord};
use serde_json::Value;
use tracing::warn;

use crate::Record;
use crate::envelope::SDC_EXTRA;
use crate::error::{FileError, TapResult};

use super::preprocess::{LinePreprocessor, PreprocessOptions};
use super::{Row, RowOptions, check_required_columns};

/// How header positions map onto record keys
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderLayout {
    /// Every header name, empty names replaced
    names: Vec<String>,
    /// Positions owning a key (first occurrence of each name)
    owners: Vec<usize>,
    /// Positions of repeated names; their values go to `_sdc_extra`
    duplicates: Vec<usize>,
}

impl HeaderLayout {
    fn new(raw: Vec<String>) -> Self {
        let names = fill_empty_names(raw);
        let mut seen = HashSet::new();
        let mut owners = Vec::new();
        let mut duplicates = Vec::new();
        for (idx, name) in names.iter().enumerate() {
            if seen.insert(name.as_str()) {
                owners.push(idx);
            } else {
                duplicates.push(idx);
            }
        }
        Self {
            names,
            owners,
            duplicates,
        }
    }

    fn unique_names(&self) -> Vec<String> {
        self.owners.iter().map(|idx| self.names[*idx].clone()).collect()
    }
}

/// Replace empty header names with `col_N`, skipping names already in use
fn fill_empty_names(raw: Vec<String>) -> Vec<String> {
    let taken: HashSet<String> = raw.iter().filter(|n| !n.is_empty()).cloned().collect();
    let mut counter = 0usize;
    raw.into_iter()
        .map(|name| {
            if !name.is_empty() {
                return name;
            }
            let mut generated = format!("col_{counter}");
            while taken.contains(&generated) {
                counter += 1;
                generated = format!("col_{counter}");
            }
            counter += 1;
            generated
        })
        .collect()
}

/// Lazy iterator over the rows of one delimited file
///
/// Yields `Err` at most once: a decode failure ends the iteration.
pub struct CsvRowIterator<R: Read> {
    reader: csv::Reader<LinePreprocessor<R>>,
    path: String,
    layout: HeaderLayout,
    pending: Option<StringRecord>,
    record: StringRecord,
    keep_empty_rows: bool,
    pad_short_rows: bool,
    finished: bool,
}

impl<R: Read> CsvRowIterator<R> {
    /// Read the header row and validate required columns
    ///
    /// Fails with [`TapError::MissingHeaders`](crate::TapError::MissingHeaders) when key
    /// properties or date overrides are not in the header, and with a recoverable
    /// file error when the file is empty or cannot be decoded.
    pub fn new(stream: R, path: impl Into<String>, options: &RowOptions) -> TapResult<Self> {
        let path = path.into();
        let preprocessor = LinePreprocessor::new(
            stream,
            PreprocessOptions {
                encoding: options.encoding,
                skip_header_row: options.skip_header_row,
                skip_footer_row: options.skip_footer_row,
                keep_empty_rows: options.keep_empty_rows,
                quote: options.quote,
                escape: options.escape,
            },
        );
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(options.delimiter)
            .quote(options.quote)
            .escape(options.escape)
            .from_reader(preprocessor);

        let mut first = StringRecord::new();
        let has_rows = reader
            .read_record(&mut first)
            .map_err(|e| FileError::decode(&path, e))?;
        if !has_rows {
            return Err(FileError::Empty { path }.into());
        }

        let (raw_names, pending) = if options.has_header {
            (first.iter().map(str::to_string).collect(), None)
        } else {
            ((0..first.len()).map(|i| format!("col_{i}")).collect(), Some(first))
        };
        let layout = HeaderLayout::new(raw_names);

        if !layout.duplicates.is_empty() {
            let repeated: Vec<&str> = layout
                .duplicates
                .iter()
                .map(|idx| layout.names[*idx].as_str())
                .collect();
            warn!(
                file = %path,
                headers = ?repeated,
                "Duplicate header(s) found; their values will be stored in the \"_sdc_extra\" field"
            );
        }

        let unique = layout.unique_names();
        check_required_columns(&path, &unique, options)?;

        Ok(Self {
            reader,
            path,
            layout,
            pending,
            record: StringRecord::new(),
            keep_empty_rows: options.keep_empty_rows,
            pad_short_rows: options.pad_short_rows,
            finished: false,
        })
    }

    /// Record keys in header order (duplicates removed)
    pub fn headers(&self) -> Vec<String> {
        self.layout.unique_names()
    }

    fn build(&self, fields: &StringRecord) -> Record {
        let mut record = Record::new();

        if self.keep_empty_rows && fields.len() == 1 && fields.get(0) == Some("") {
            for idx in &self.layout.owners {
                record.insert(self.layout.names[*idx].clone(), Value::Null);
            }
            return record;
        }

        for idx in &self.layout.owners {
            match fields.get(*idx) {
                Some(value) => {
                    record.insert(self.layout.names[*idx].clone(), Value::String(value.to_string()));
                }
                None if self.pad_short_rows => {
                    record.insert(self.layout.names[*idx].clone(), Value::Null);
                }
                None => {}
            }
        }

        let mut extra: Vec<Value> = self
            .layout
            .duplicates
            .iter()
            .filter_map(|idx| fields.get(*idx))
            .map(|value| Value::String(value.to_string()))
            .collect();
        extra.extend(
            fields
                .iter()
                .skip(self.layout.names.len())
                .map(|value| Value::String(value.to_string())),
        );
        if !extra.is_empty() {
            record.insert(SDC_EXTRA.to_string(), Value::Array(extra));
        }
        record
    }
}

impl<R: Read> Iterator for CsvRowIterator<R> {
    type Item = Result<Row, FileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let fields = match self.pending.take() {
            Some(first) => first,
            None => match self.reader.read_record(&mut self.record) {
                Ok(true) => std::mem::take(&mut self.record),
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(FileError::decode(&self.path, e)));
                }
            },
        };

        let parsed_line = fields.position().map(|p| p.line()).unwrap_or(1);
        let line = self.reader.get_ref().physical_line(parsed_line);
        Some(Ok(Row {
            line_number: line,
            record: self.build(&fields),
        }))
    }
}
