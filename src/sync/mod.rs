//! Incremental sync
//!
//! Files of a table are read in bookmark order. After each file the bookmark
//! moves to that file's modification time and the state is written, so a
//! restarted sync resumes with the first file not yet completed.

mod state;
mod writer;

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::Record;
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::{SortOrder, TableSpec, TapConfig};
use crate::envelope::{
    SDC_EXTRA, SDC_SOURCE_BUCKET, SDC_SOURCE_FILE, SDC_SOURCE_LINENO, is_envelope_field,
};
use crate::error::{TapError, TapResult};
use crate::rows::{Row, RowOptions};
use crate::sampling::{get_input_files_for_table, table_row_options};
use crate::schema::SchemaFragment;
use crate::source::{SkipCounter, SourceEntry, expand_object, open_rows};
use crate::storage::{ObjectMeta, ObjectStore};
use crate::transform::{FieldSelection, Transformer, resolve_filter_fields};

pub use state::{Bookmark, State};
pub use writer::{JsonLinesWriter, MemoryWriter, Message, RecordWriter};

/// Everything needed to turn one table's rows into output records
struct StreamContext<'a> {
    bucket: &'a str,
    stream: &'a str,
    schema: &'a SchemaFragment,
    selection: FieldSelection,
    /// Columns declared by the catalog schema, when it declares any
    known_columns: Option<BTreeSet<String>>,
    options: RowOptions,
}

/// Sync one table from its bookmark onwards
///
/// Returns the number of records written. Files that cannot be read are
/// counted in `skips` and leave the bookmark where it was.
pub fn sync_stream<S: ObjectStore + ?Sized, W: RecordWriter + ?Sized>(
    store: &S,
    config: &TapConfig,
    table: &TableSpec,
    stream: &CatalogEntry,
    state: &mut State,
    writer: &mut W,
    skips: &mut SkipCounter,
) -> TapResult<usize> {
    let table_name = table.table_name.as_str();
    let modified_since = state.modified_since(table_name)?.unwrap_or(config.start_date);

    info!("Syncing table \"{}\".", table_name);
    info!("Getting files modified since {}.", modified_since);

    let mut files = get_input_files_for_table(store, table, Some(modified_since))?;
    if config.sort_order == SortOrder::Key {
        files.sort_by(|a, b| a.key.cmp(&b.key));
    }

    let known_columns = stream
        .schema
        .properties()
        .filter(|properties| !properties.is_empty())
        .map(|properties| properties.keys().cloned().collect());
    let context = StreamContext {
        bucket: store.bucket(),
        stream: &stream.stream,
        schema: &stream.schema,
        selection: resolve_filter_fields(&stream.metadata),
        known_columns,
        options: table_row_options(store, table, &files)?,
    };
    let mut transformer = Transformer::new().with_integer_datetime(config.integer_datetime_fmt);

    let mut records_streamed = 0;
    for file in &files {
        match sync_file(store, file, &context, &mut transformer, writer, skips) {
            Ok(count) => records_streamed += count,
            Err(TapError::File(e)) => {
                warn!(
                    "Skipping {} file as parsing failed. Verify an extension of the file.",
                    file.key
                );
                skips.record_error(&e);
                continue;
            }
            Err(e) => return Err(e),
        }

        state.advance_modified_since(table_name, file.last_modified)?;
        writer.write_state(state)?;
    }

    info!("Wrote {} records for table \"{}\".", records_streamed, table_name);
    Ok(records_streamed)
}

/// Sync every record of one object (every member, for a zip archive)
///
/// A zip member that fails to decode is skipped on its own; the remaining
/// members are still read.
fn sync_file<S: ObjectStore + ?Sized, W: RecordWriter + ?Sized>(
    store: &S,
    file: &ObjectMeta,
    context: &StreamContext<'_>,
    transformer: &mut Transformer,
    writer: &mut W,
    skips: &mut SkipCounter,
) -> TapResult<usize> {
    info!("Syncing file \"{}\".", file.key);

    let mut records_synced = 0;
    for entry in expand_object(store, file, skips)? {
        match sync_entry(store, &entry, context, transformer, writer, skips) {
            Ok(count) => records_synced += count,
            Err(TapError::File(e)) if entry.is_zip_member() => {
                warn!("Skipping archive member {} as parsing failed.", entry.path);
                skips.record_error(&e);
            }
            Err(e) => return Err(e),
        }
        transformer.cleanup();
    }
    Ok(records_synced)
}

fn sync_entry<S: ObjectStore + ?Sized, W: RecordWriter + ?Sized>(
    store: &S,
    entry: &SourceEntry,
    context: &StreamContext<'_>,
    transformer: &mut Transformer,
    writer: &mut W,
    skips: &mut SkipCounter,
) -> TapResult<usize> {
    let Some(opened) = open_rows(store, entry, &context.options, skips)? else {
        return Ok(0);
    };

    let mut records_synced = 0;
    let mut unknown_keys = BTreeSet::new();
    for row in opened.rows {
        let row = row?;
        if row.record.is_empty() {
            continue;
        }
        let record = envelope_record(row, &entry.path, context, &mut unknown_keys);
        let record = transformer.transform(record, context.schema, &context.selection)?;
        writer.write_record(context.stream, record)?;
        records_synced += 1;
    }

    if !unknown_keys.is_empty() {
        warn!(
            "{:?} not found in catalog for {}; values are stored in the \"{}\" field.",
            unknown_keys, entry.path, SDC_EXTRA
        );
    }
    Ok(records_synced)
}

/// Add envelope fields to a row and move keys unknown to the catalog into `_sdc_extra`
fn envelope_record(
    row: Row,
    path: &str,
    context: &StreamContext<'_>,
    unknown_keys: &mut BTreeSet<String>,
) -> Record {
    let Row {
        line_number,
        mut record,
    } = row;

    let mut extra: Vec<Value> = match record.remove(SDC_EXTRA) {
        Some(Value::Array(values)) => values,
        Some(other) => vec![other],
        None => Vec::new(),
    };

    if let Some(known) = &context.known_columns {
        let unknown: Vec<String> = record
            .keys()
            .filter(|key| !known.contains(*key) && !is_envelope_field(key))
            .cloned()
            .collect();
        for key in unknown {
            if let Some(value) = record.remove(&key) {
                let mut entry = Map::new();
                entry.insert(key.clone(), value);
                extra.push(Value::Object(entry));
                unknown_keys.insert(key);
            }
        }
    }

    record.insert(SDC_SOURCE_BUCKET.to_string(), Value::from(context.bucket));
    record.insert(SDC_SOURCE_FILE.to_string(), Value::from(path));
    record.insert(SDC_SOURCE_LINENO.to_string(), Value::from(line_number));
    if !extra.is_empty() {
        record.insert(SDC_EXTRA.to_string(), Value::Array(extra));
    }
    record
}

/// Sync every selected stream of a catalog
///
/// Streams run in catalog order and share one skip counter. The schema of
/// each stream is written before its records. Returns the total records.
pub fn sync_catalog<S: ObjectStore + ?Sized, W: RecordWriter + ?Sized>(
    store: &S,
    config: &TapConfig,
    catalog: &Catalog,
    state: &mut State,
    writer: &mut W,
) -> TapResult<usize> {
    config.validate()?;

    let mut skips = SkipCounter::new();
    let mut total = 0;
    for stream in catalog.selected_streams() {
        let Some(table) = config.table(&stream.stream) else {
            warn!("Stream {} is selected but has no table configuration", stream.stream);
            continue;
        };
        writer.write_schema(&stream.stream, &stream.schema, &stream.key_properties())?;
        total += sync_stream(store, config, table, stream, state, writer, &mut skips)?;
    }
    skips.report("sync");
    Ok(total)
}
