//! File dispatch
//!
//! Routes listed objects to a row iterator by extension:
//!
//! | Extension        | Handling                                               |
//! |------------------|--------------------------------------------------------|
//! | `csv`, `txt`     | delimited rows                                         |
//! | `jsonl`          | JSON lines                                             |
//! | `gz`             | one gzip layer, dispatched on the name in its header   |
//! | `zip`            | expanded into its entries (nested archives skipped)    |
//! | `tar.gz`, others | skipped                                                |
//!
//! Unreadable files never abort the run: they are recorded in a
//! [`SkipCounter`] and reported once at the end.

mod compression;

use std::io::Cursor;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FileError, TapError, TapResult};
use crate::rows::{CsvRowIterator, JsonlRowIterator, RowIter, RowOptions};
use crate::storage::{ByteStream, ObjectMeta, ObjectStore};

pub use compression::{GzipMember, ZipEntry, open_gzip, read_zip_entries};

/// File type derived from a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// `.csv` / `.txt`
    Delimited,
    /// `.jsonl`
    Jsonl,
    /// `.gz`
    Gzip,
    /// `.zip`
    Zip,
    /// `.tar.gz`
    TarGz,
    /// Missing or unrecognized extension
    Unknown(Option<String>),
}

impl FileKind {
    /// Classify a key or file name by its extension (case-insensitive)
    pub fn from_name(name: &str) -> Self {
        let file_name = name.rsplit('/').next().unwrap_or(name).to_lowercase();
        if file_name.ends_with(".tar.gz") {
            return FileKind::TarGz;
        }
        let Some((stem, extension)) = file_name.rsplit_once('.') else {
            return FileKind::Unknown(None);
        };
        if stem.is_empty() {
            return FileKind::Unknown(None);
        }
        match extension {
            "csv" | "txt" => FileKind::Delimited,
            "jsonl" => FileKind::Jsonl,
            "gz" => FileKind::Gzip,
            "zip" => FileKind::Zip,
            other => FileKind::Unknown(Some(other.to_string())),
        }
    }

    /// Whether the kind is a compressed container
    pub fn is_compressed(&self) -> bool {
        matches!(self, FileKind::Gzip | FileKind::Zip | FileKind::TarGz)
    }
}

/// Counts files skipped during sampling or sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipCounter {
    skipped: Vec<(String, String)>,
}

impl SkipCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skipped file
    pub fn record(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        let path = path.into();
        let reason = reason.into();
        warn!(file = %path, reason = %reason, "Skipping file");
        self.skipped.push((path, reason));
    }

    /// Record a recoverable file error
    pub fn record_error(&mut self, error: &FileError) {
        let reason = match error {
            FileError::Unsupported { reason, .. } | FileError::Decode { reason, .. } => {
                reason.clone()
            }
            FileError::Empty { .. } => "file is empty".to_string(),
        };
        self.record(error.path(), reason);
    }

    /// Number of skipped files
    pub fn count(&self) -> usize {
        self.skipped.len()
    }

    /// Skipped files with their reasons, in order
    pub fn reasons(&self) -> &[(String, String)] {
        &self.skipped
    }

    /// Log the final skip total for an activity (`sampling`, `sync`)
    pub fn report(&self, activity: &str) {
        if self.count() > 0 {
            warn!(
                skipped = self.count(),
                "{} files got skipped during the last {}.",
                self.count(),
                activity
            );
        }
    }
}

/// Where an entry's bytes come from
#[derive(Debug, Clone)]
enum EntryData {
    /// Stream the object from the store on open
    Object,
    /// Already in memory (zip member)
    Bytes(Arc<[u8]>),
}

/// A readable file: a listed object or a member of a zip archive
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Object key
    pub key: String,
    /// Display path: the key, or `key/member` for zip members
    pub path: String,
    pub kind: FileKind,
    pub meta: ObjectMeta,
    data: EntryData,
}

impl SourceEntry {
    /// Entry for a listed object
    pub fn object(meta: &ObjectMeta) -> Self {
        Self {
            key: meta.key.clone(),
            path: meta.key.clone(),
            kind: FileKind::from_name(&meta.key),
            meta: meta.clone(),
            data: EntryData::Object,
        }
    }

    fn zip_member(meta: &ObjectMeta, entry: ZipEntry) -> Self {
        Self {
            key: meta.key.clone(),
            path: format!("{}/{}", meta.key, entry.name),
            kind: FileKind::from_name(&entry.name),
            meta: meta.clone(),
            data: EntryData::Bytes(Arc::from(entry.data)),
        }
    }

    /// Whether the entry is a zip member
    pub fn is_zip_member(&self) -> bool {
        matches!(self.data, EntryData::Bytes(_))
    }

    fn open<S: ObjectStore + ?Sized>(&self, store: &S) -> TapResult<ByteStream> {
        match &self.data {
            EntryData::Object => Ok(store.open_object(&self.key)?),
            EntryData::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }
}

/// Expand a listed object into readable entries
///
/// Zip archives are read into memory and replaced by their members; members
/// that are themselves compressed are skipped. Any other object yields one
/// entry, opened lazily.
pub fn expand_object<S: ObjectStore + ?Sized>(
    store: &S,
    meta: &ObjectMeta,
    skips: &mut SkipCounter,
) -> TapResult<Vec<SourceEntry>> {
    if FileKind::from_name(&meta.key) != FileKind::Zip {
        return Ok(vec![SourceEntry::object(meta)]);
    }

    let stream = store.open_object(&meta.key)?;
    let members = match read_zip_entries(&meta.key, stream) {
        Ok(members) => members,
        Err(e) => {
            skips.record_error(&e);
            return Ok(Vec::new());
        }
    };
    debug!(file = %meta.key, members = members.len(), "Expanded zip archive");

    let mut entries = Vec::with_capacity(members.len());
    for member in members {
        let entry = SourceEntry::zip_member(meta, member);
        if entry.kind.is_compressed() {
            skips.record(entry.path.clone(), "compressed files inside zip archives are not supported");
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Rows of an opened entry
pub struct OpenedRows<'a> {
    pub rows: RowIter<'a>,
    /// Kind the rows were parsed as; for gzip files, the kind of the member
    pub kind: FileKind,
}

/// Build the row iterator for an entry
///
/// Returns `Ok(None)` (and records a skip) when the entry cannot be read:
/// unsupported kinds, gzip files without an original name, nested
/// compression, empty or undecodable headers. Missing required CSV headers are
/// fatal.
pub fn open_rows<'a, S: ObjectStore + ?Sized>(
    store: &S,
    entry: &SourceEntry,
    options: &RowOptions,
    skips: &mut SkipCounter,
) -> TapResult<Option<OpenedRows<'a>>> {
    let outcome = match &entry.kind {
        FileKind::Delimited | FileKind::Jsonl => {
            let stream = entry.open(store)?;
            rows_for_kind(entry.kind.clone(), stream, &entry.path, options)
        }
        FileKind::Gzip => {
            let stream = entry.open(store)?;
            open_gzip_rows(stream, &entry.path, options)
        }
        FileKind::Zip => Err(FileError::unsupported(
            &entry.path,
            "zip archives are only read through archive expansion",
        )
        .into()),
        FileKind::TarGz => {
            Err(FileError::unsupported(&entry.path, "tar archives are not supported").into())
        }
        FileKind::Unknown(None) => {
            Err(FileError::unsupported(&entry.path, "file has no extension").into())
        }
        FileKind::Unknown(Some(extension)) => Err(FileError::unsupported(
            &entry.path,
            format!("unsupported file extension {extension:?}"),
        )
        .into()),
    };

    match outcome {
        Ok(rows) => Ok(Some(rows)),
        Err(TapError::File(e)) => {
            skips.record_error(&e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn open_gzip_rows<'a>(
    stream: ByteStream,
    path: &str,
    options: &RowOptions,
) -> TapResult<OpenedRows<'a>> {
    let member = open_gzip(stream);
    let Some(inner_name) = member.inner_name else {
        return Err(FileError::unsupported(
            path,
            "gzip file has no original file name in its header",
        )
        .into());
    };

    let inner_kind = FileKind::from_name(&inner_name);
    if inner_kind.is_compressed() {
        return Err(FileError::unsupported(
            path,
            format!("nested compressed file {inner_name:?} is not supported"),
        )
        .into());
    }
    if !matches!(inner_kind, FileKind::Delimited | FileKind::Jsonl) {
        return Err(FileError::unsupported(
            path,
            format!("gzip member {inner_name:?} has an unsupported extension"),
        )
        .into());
    }

    debug!(file = %path, inner = %inner_name, "Reading gzip member");
    rows_for_kind(inner_kind, Box::new(member.reader), path, options)
}

fn rows_for_kind<'a>(
    kind: FileKind,
    stream: ByteStream,
    path: &str,
    options: &RowOptions,
) -> TapResult<OpenedRows<'a>> {
    let rows: RowIter<'a> = match kind {
        FileKind::Jsonl => Box::new(JsonlRowIterator::new(stream, path)),
        _ => Box::new(CsvRowIterator::new(stream, path, options)?),
    };
    Ok(OpenedRows { rows, kind })
}
