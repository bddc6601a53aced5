//! Schema mismatch errors raised while coercing records

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// One step of the path to a value inside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A value that no permitted type could hold
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub path: Vec<PathSegment>,
    pub data: Value,
    pub schema: Value,
}

impl Mismatch {
    /// Dot-joined path, array indices included
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} does not match {}",
            self.path_string(),
            self.data,
            self.schema
        )
    }
}

/// All coercion failures of one record
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Errors during transform: [{}]", join_mismatches(.errors))]
pub struct SchemaMismatch {
    pub errors: Vec<Mismatch>,
}

impl SchemaMismatch {
    pub fn new(errors: Vec<Mismatch>) -> Self {
        Self { errors }
    }

    /// Paths of the failing values
    pub fn paths(&self) -> Vec<String> {
        self.errors.iter().map(Mismatch::path_string).collect()
    }
}

fn join_mismatches(errors: &[Mismatch]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
