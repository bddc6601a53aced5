//! Error types for the tap
//!
//! Two layers are kept apart:
//! - [`FileError`]: a single file could not be used. Dispatch code logs it,
//!   counts it as a skip and moves on to the next file.
//! - [`TapError`]: the run cannot continue (bad configuration, a table with no
//!   files, a record that does not fit the catalog schema, a broken store).

use thiserror::Error;

use crate::storage::StorageError;
use crate::transform::SchemaMismatch;

/// Result alias used across the crate
pub type TapResult<T> = Result<T, TapError>;

/// Recoverable per-file conditions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    /// The file type cannot be read (unknown extension, archive nesting, tarball)
    #[error("Skipping {path}: {reason}")]
    Unsupported { path: String, reason: String },

    /// The file content could not be decoded
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    /// The file has no usable content
    #[error("File {path} is empty")]
    Empty { path: String },
}

impl FileError {
    /// Create an unsupported-file error
    pub fn unsupported(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FileError::Unsupported {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(path: impl Into<String>, reason: impl ToString) -> Self {
        FileError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Path of the file the error refers to
    pub fn path(&self) -> &str {
        match self {
            FileError::Unsupported { path, .. }
            | FileError::Decode { path, .. }
            | FileError::Empty { path } => path,
        }
    }
}

/// Fatal tap errors
#[derive(Error, Debug)]
pub enum TapError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// key_properties or date_overrides name columns missing from a CSV header
    #[error("CSV file {path} is missing required headers: {missing:?}")]
    MissingHeaders {
        path: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    /// key_properties or date_overrides name keys missing from sampled JSONL records
    #[error("JSONL file {path} is missing required keys: {missing:?}")]
    JsonlMissingKeys { path: String, missing: Vec<String> },

    /// No objects in the bucket matched a table's search pattern
    #[error("No files found matching pattern {pattern} for table {table}")]
    NoMatchingFiles { table: String, pattern: String },

    /// A record could not be coerced into its catalog schema
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),

    /// Object store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A per-file condition that was escalated
    #[error(transparent)]
    File(#[from] FileError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TapError {
    /// Whether the error only affects the current file
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TapError::File(_))
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            TapError::Config(msg) => {
                format!("Invalid configuration: {msg}\n\nHint: Check the tables section of your config.")
            }
            TapError::MissingHeaders {
                path,
                missing,
                available,
            } => {
                format!(
                    "CSV file {path} is missing required headers: {}\nAvailable headers: {}\n\n\
                    Hint: key_properties and date_overrides must name columns in the header row.",
                    missing.join(", "),
                    available.join(", ")
                )
            }
            TapError::JsonlMissingKeys { path, missing } => {
                format!(
                    "JSONL file {path} is missing required keys: {}\n\n\
                    Hint: key_properties and date_overrides must be present in every record.",
                    missing.join(", ")
                )
            }
            TapError::NoMatchingFiles { table, pattern } => {
                format!(
                    "No files found for table {table} (pattern {pattern}).\n\n\
                    Hint: Check search_prefix and search_pattern against the bucket listing."
                )
            }
            TapError::SchemaMismatch(mismatch) => {
                format!(
                    "{mismatch}\n\nHint: Re-run discovery if the source files changed shape."
                )
            }
            _ => self.to_string(),
        }
    }
}
