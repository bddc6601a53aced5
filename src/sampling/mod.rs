//! File listing and record sampling for schema discovery

use std::collections::HashSet;
use std::io::Read;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::Record;
use crate::config::{TableSpec, TapConfig};
use crate::error::{TapError, TapResult};
use crate::inference::{ResolvedSchema, generate_schema};
use crate::range::EOL_SAMPLE_SIZE;
use crate::rows::{RowOptions, sniff_dialect};
use crate::source::{FileKind, SkipCounter, SourceEntry, expand_object, open_rows};
use crate::storage::{ObjectMeta, ObjectStore};

/// Sampling limits for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLimits {
    /// Keep every Nth record
    pub sample_rate: usize,
    /// Records kept per file
    pub max_records: usize,
    /// Files sampled per table
    pub max_files: usize,
}

impl Default for SampleLimits {
    fn default() -> Self {
        Self {
            sample_rate: 5,
            max_records: 1000,
            max_files: 5,
        }
    }
}

impl SampleLimits {
    /// Limits taken from the tap configuration
    pub fn from_config(config: &TapConfig) -> Self {
        Self {
            sample_rate: config.sample_rate.max(1),
            max_records: config.max_records,
            max_files: config.max_files,
        }
    }
}

/// Objects matching a table, oldest first
///
/// Keys must match `search_pattern` and, when `modified_since` is given, be
/// modified strictly after it. With `recursive_search` disabled, keys nested
/// below the search prefix are ignored.
pub fn get_input_files_for_table<S: ObjectStore + ?Sized>(
    store: &S,
    table: &TableSpec,
    modified_since: Option<DateTime<Utc>>,
) -> TapResult<Vec<ObjectMeta>> {
    let pattern = table.pattern()?;
    let prefix = table.search_prefix.as_deref().filter(|p| !p.is_empty());
    info!(
        "Checking bucket \"{}\" for keys matching \"{}\"",
        store.bucket(),
        table.search_pattern
    );

    let mut matched = Vec::new();
    for object in store.list_objects(prefix)? {
        if !table.recursive_search && is_nested(&object.key, prefix) {
            debug!("Will not download nested key \"{}\"", object.key);
            continue;
        }
        let fresh = modified_since.is_none_or(|since| since < object.last_modified);
        if pattern.is_match(&object.key) && fresh {
            debug!("Will download key \"{}\" (last modified {})", object.key, object.last_modified);
            matched.push(object);
        } else {
            debug!("Will not download key \"{}\"", object.key);
        }
    }

    matched.sort_by_key(|object| object.last_modified);
    info!("Found {} files matching table {}", matched.len(), table.table_name);
    Ok(matched)
}

fn is_nested(key: &str, prefix: Option<&str>) -> bool {
    let rest = match prefix {
        Some(prefix) => key.strip_prefix(prefix).unwrap_or(key),
        None => key,
    };
    rest.trim_start_matches('/').contains('/')
}

/// Row options for a table, with the delimiter and quote character detected
/// from the first delimited file when the configuration leaves them empty
pub fn table_row_options<S: ObjectStore + ?Sized>(
    store: &S,
    table: &TableSpec,
    files: &[ObjectMeta],
) -> TapResult<RowOptions> {
    let mut options = RowOptions::from_table(table)?;
    if !table.needs_dialect_detection() {
        return Ok(options);
    }

    let Some(first) = files
        .iter()
        .find(|meta| FileKind::from_name(&meta.key) == FileKind::Delimited)
    else {
        return Ok(options);
    };

    let mut sample = Vec::new();
    store
        .open_object(&first.key)?
        .take(EOL_SAMPLE_SIZE)
        .read_to_end(&mut sample)?;
    let (text, _, _) = options.encoding.decode(&sample);

    let dialect = sniff_dialect(&text, table.delimiter_byte(), table.quote_byte());
    info!(
        "Detected delimiter {:?} and quote {:?} for table {} from {}",
        char::from(dialect.delimiter),
        char::from(dialect.quote),
        table.table_name,
        first.key
    );
    options.delimiter = dialect.delimiter;
    options.quote = dialect.quote;
    Ok(options)
}

/// Sample one readable entry
///
/// Returns `Ok(None)` when the entry was skipped: unsupported, empty, or
/// undecodable part way through (rows sampled before the failure are
/// discarded).
pub fn sample_file<S: ObjectStore + ?Sized>(
    store: &S,
    entry: &SourceEntry,
    options: &RowOptions,
    limits: SampleLimits,
    skips: &mut SkipCounter,
) -> TapResult<Option<Vec<Record>>> {
    info!(
        "Sampling {} ({} records, every {}th record).",
        entry.path, limits.max_records, limits.sample_rate
    );

    let Some(opened) = open_rows(store, entry, options, skips)? else {
        return Ok(None);
    };

    let sample_rate = limits.sample_rate.max(1);
    let mut samples = Vec::new();
    let mut current_row = 0usize;
    for row in opened.rows {
        if samples.len() >= limits.max_records {
            break;
        }
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                skips.record_error(&e);
                return Ok(None);
            }
        };
        if row.record.is_empty() {
            continue;
        }
        if current_row % sample_rate == 0 {
            samples.push(row.record);
        }
        current_row += 1;
    }

    if opened.kind == FileKind::Jsonl {
        check_jsonl_keys(&entry.path, &samples, options)?;
    }

    info!("Sampled {} records.", samples.len());
    Ok(Some(samples))
}

/// Fail when sampled JSONL records lack key properties or date overrides
fn check_jsonl_keys(path: &str, samples: &[Record], options: &RowOptions) -> TapResult<()> {
    if samples.is_empty() {
        return Ok(());
    }
    let seen: HashSet<&str> = samples
        .iter()
        .flat_map(|record| record.keys().map(String::as_str))
        .collect();
    let missing: Vec<String> = options
        .key_properties
        .iter()
        .chain(options.date_overrides.iter())
        .filter(|name| !seen.contains(name.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TapError::JsonlMissingKeys {
            path: path.to_string(),
            missing,
        })
    }
}

/// Sample at most `max_files` candidate files
///
/// Zip archives count once per contained file. Every candidate counts,
/// including ones that end up skipped.
pub fn sample_files<S: ObjectStore + ?Sized>(
    store: &S,
    files: &[ObjectMeta],
    options: &RowOptions,
    limits: SampleLimits,
    skips: &mut SkipCounter,
) -> TapResult<Vec<Record>> {
    let mut samples = Vec::new();
    let mut files_sampled = 0usize;

    'files: for meta in files {
        for entry in expand_object(store, meta, skips)? {
            if files_sampled >= limits.max_files {
                break 'files;
            }
            files_sampled += 1;
            if let Some(records) = sample_file(store, &entry, options, limits, skips)? {
                samples.extend(records);
            }
        }
    }

    debug!("Sampled {} files", files_sampled);
    Ok(samples)
}

/// Infer a table's column schema from a sample of its files
pub fn get_sampled_schema_for_table<S: ObjectStore + ?Sized>(
    store: &S,
    config: &TapConfig,
    table: &TableSpec,
    skips: &mut SkipCounter,
) -> TapResult<ResolvedSchema> {
    info!("Sampling records to determine table schema.");

    let files = get_input_files_for_table(store, table, None)?;
    if files.is_empty() {
        return Err(TapError::NoMatchingFiles {
            table: table.table_name.clone(),
            pattern: table.search_pattern.clone(),
        });
    }

    let options = table_row_options(store, table, &files)?;
    let samples = sample_files(store, &files, &options, SampleLimits::from_config(config), skips)?;
    Ok(generate_schema(&samples, table))
}
