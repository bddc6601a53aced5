//! Schema inference from sampled records
//!
//! Each sampled value is tagged with the type it looks like (`integer`,
//! `number`, `string`, `date-time`, `dict`, `list.<item>`). Tags are counted per
//! column and resolved to one JSON Schema fragment per column.
//!
//! ## Example
//!
//! ```rust
//! use s3_csv_tap::config::TableSpec;
//! use s3_csv_tap::inference::generate_schema;
//! use serde_json::json;
//!
//! let table = TableSpec::new("people", r"\.csv$");
//! let record = json!({"id": "1", "name": "Alice"}).as_object().unwrap().clone();
//! let schema = generate_schema([&record], &table);
//! assert_eq!(schema.len(), 2);
//! ```

mod aggregate;
mod conversion;
mod types;

pub use aggregate::{
    ResolvedSchema, TypeCounts, count_sample, datatype_schema, generate_schema, pick_datatype,
    resolve_counts,
};
pub use conversion::infer;
pub use types::{ItemTag, TypeTag};
