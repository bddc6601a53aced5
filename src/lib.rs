//! S3 CSV Tap - schema discovery and incremental extraction of delimited files
//!
//! Provides:
//! - Object store access (in-memory, local directory, S3 behind the `s3` feature)
//! - File dispatch for CSV, JSONL, gzip and zip sources
//! - Row iteration with header, dialect and encoding handling
//! - Parallel byte-range reading of large CSV files
//! - Schema inference from sampled records and catalog discovery
//! - Record coercion into a discovered schema
//! - Bookmarked incremental sync

pub mod catalog;
pub mod config;
pub mod envelope;
pub mod error;
pub mod inference;
pub mod range;
pub mod rows;
pub mod sampling;
pub mod schema;
pub mod source;
pub mod storage;
pub mod sync;
pub mod transform;

/// A raw or coerced record: column name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use error::{FileError, TapError, TapResult};
pub use storage::{MemoryObjectStore, ObjectMeta, ObjectStore, StorageError};
#[cfg(feature = "native-fs")]
pub use storage::LocalObjectStore;
#[cfg(feature = "s3")]
pub use storage::{S3ObjectStore, S3Source};

pub use config::{SortOrder, TableSpec, TapConfig};
pub use catalog::{Catalog, CatalogEntry, discover_schema, discover_streams, load_metadata};
pub use inference::{ResolvedSchema, TypeTag, generate_schema, infer};
pub use range::read_range;
pub use rows::{CsvRowIterator, JsonlRowIterator, Row, RowOptions};
pub use sampling::{get_input_files_for_table, get_sampled_schema_for_table, sample_files};
pub use schema::{JsonType, SchemaFragment};
pub use source::{FileKind, SkipCounter};
pub use sync::{MemoryWriter, RecordWriter, State, sync_catalog, sync_stream};
pub use transform::{FieldSelection, SchemaMismatch, Transformer, resolve_filter_fields};
