//! Record coercion into a catalog schema
//!
//! Runs in two passes over a record:
//!
//! 1. **Filter**: keys whose breadcrumb is filtered (not selected or
//!    unsupported) are dropped, unless the breadcrumb is automatic.
//! 2. **Coerce**: every value is converted to the first type its schema
//!    permits. `null` is tried last, but null-like values (`null`, `""`,
//!    `"<null>"`) become null whenever the schema allows it.
//!
//! Keys unknown to the schema are dropped and remembered as *removed*. Values
//! that fit no permitted type fail the whole record with a [`SchemaMismatch`]
//! listing every failing path.
//!
//! # Example
//!
//! ```
//! use s3_csv_tap::schema::SchemaFragment;
//! use s3_csv_tap::transform::{FieldSelection, Transformer};
//! use serde_json::json;
//!
//! let schema: SchemaFragment = serde_json::from_value(json!({
//!     "type": "object",
//!     "properties": {"id": {"type": ["integer", "string", "null"]}}
//! }))
//! .unwrap();
//! let record = json!({"id": "42"}).as_object().cloned().unwrap();
//!
//! let mut transformer = Transformer::new();
//! let out = transformer
//!     .transform(record, &schema, &FieldSelection::new())
//!     .unwrap();
//! assert_eq!(out["id"], json!(42));
//! ```

mod datetime;
mod error;
mod metadata;

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::Record;
use crate::catalog::Breadcrumb;
use crate::schema::{JsonType, SchemaFragment, TypedSchema};

pub use datetime::{IntegerDatetimeMode, format_bookmark, format_datetime, parse_datetime};
pub use error::{Mismatch, PathSegment, SchemaMismatch};
pub use metadata::{FieldSelection, breadcrumb_path, resolve_filter_fields};

/// Literal some exports write for missing values
pub const NULL_LITERAL: &str = "<null>";

/// Outcome of coercing one value: the converted value, or the leaf failures
/// that prevented it
type Coerced = Result<Value, Vec<Mismatch>>;

/// Coerces records into a schema and tracks filtered and removed paths
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    integer_datetime: IntegerDatetimeMode,
    removed: BTreeSet<String>,
    filtered: BTreeSet<String>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how integers in date-time fields are read
    pub fn with_integer_datetime(mut self, mode: IntegerDatetimeMode) -> Self {
        self.integer_datetime = mode;
        self
    }

    /// Paths dropped because the schema does not know them
    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    /// Paths dropped by field selection
    pub fn filtered(&self) -> &BTreeSet<String> {
        &self.filtered
    }

    /// Filter and coerce one record
    pub fn transform(
        &mut self,
        record: Record,
        schema: &SchemaFragment,
        selection: &FieldSelection,
    ) -> Result<Record, SchemaMismatch> {
        let filtered = self.filter_record(record, selection);
        match self.coerce(Value::Object(filtered), schema, &[], selection, None) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SchemaMismatch::new(vec![Mismatch {
                path: Vec::new(),
                data: other,
                schema: schema.to_value(),
            }])),
            Err(errors) => Err(SchemaMismatch::new(errors)),
        }
    }

    /// Drop filtered keys from a record
    ///
    /// Applying the same selection again leaves the result unchanged.
    pub fn filter_record(&mut self, record: Record, selection: &FieldSelection) -> Record {
        if selection.filtered.is_empty() {
            return record;
        }
        self.filter_object(record, selection, &[])
    }

    fn filter_object(&mut self, object: Map<String, Value>, selection: &FieldSelection, parent: &[String]) -> Map<String, Value> {
        let mut kept = Map::with_capacity(object.len());
        for (key, value) in object {
            let mut breadcrumb: Breadcrumb = parent.to_vec();
            breadcrumb.push("properties".to_string());
            breadcrumb.push(key.clone());

            if selection.automatic.contains(&breadcrumb) {
                kept.insert(key, value);
            } else if selection.filtered.contains(&breadcrumb) {
                self.filtered.insert(breadcrumb_path(&breadcrumb));
            } else {
                let value = self.filter_value(value, selection, &breadcrumb);
                kept.insert(key, value);
            }
        }
        kept
    }

    fn filter_value(&mut self, value: Value, selection: &FieldSelection, breadcrumb: &[String]) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.filter_object(map, selection, breadcrumb)),
            Value::Array(items) => {
                let mut item_crumb = breadcrumb.to_vec();
                item_crumb.push("items".to_string());
                Value::Array(
                    items
                        .into_iter()
                        .map(|item| self.filter_value(item, selection, &item_crumb))
                        .collect(),
                )
            }
            other => other,
        }
    }

    fn coerce(
        &mut self,
        data: Value,
        schema: &SchemaFragment,
        path: &[PathSegment],
        selection: &FieldSelection,
        source_type: Option<JsonType>,
    ) -> Coerced {
        match schema {
            SchemaFragment::Unconstrained => Ok(data),
            SchemaFragment::AnyOf(options) => self.coerce_any_of(data, schema, options, path, selection),
            SchemaFragment::Typed(typed) => self.coerce_typed(data, schema, typed, path, selection, source_type),
        }
    }

    fn coerce_any_of(
        &mut self,
        data: Value,
        schema: &SchemaFragment,
        options: &[SchemaFragment],
        path: &[PathSegment],
        selection: &FieldSelection,
    ) -> Coerced {
        if is_null_like(&data) && options.iter().any(permits_null) {
            return Ok(Value::Null);
        }

        let mut nested = None;
        for option in options {
            match self.coerce(data.clone(), option, path, selection, None) {
                Ok(value) => return Ok(value),
                Err(errors) => {
                    if nested.is_none() && errors.iter().any(|e| e.path.len() > path.len()) {
                        nested = Some(errors);
                    }
                }
            }
        }
        Err(nested.unwrap_or_else(|| vec![mismatch(path, data, schema)]))
    }

    fn coerce_typed(
        &mut self,
        data: Value,
        schema: &SchemaFragment,
        typed: &TypedSchema,
        path: &[PathSegment],
        selection: &FieldSelection,
        source_type: Option<JsonType>,
    ) -> Coerced {
        if typed.types.contains(&JsonType::Null) && is_null_like(&data) {
            return Ok(Value::Null);
        }

        let mut nested = None;
        for json_type in typed.types.iter().filter(|t| **t != JsonType::Null) {
            let attempt = if let Some(forced) = source_type {
                convert_scalar(&data, forced).ok_or_default()
            } else {
                match (typed.format.as_deref(), json_type) {
                    (Some("date-time"), _) => {
                        datetime::coerce_datetime(&data, self.integer_datetime)
                            .map(Value::String)
                            .ok_or_default()
                    }
                    (Some("singer.decimal"), _) => convert_decimal(&data).ok_or_default(),
                    (_, JsonType::Object) => self.coerce_object(data.clone(), typed, path, selection),
                    (_, JsonType::Array) => self.coerce_array(data.clone(), typed, path, selection),
                    (_, scalar) => convert_scalar(&data, *scalar).ok_or_default(),
                }
            };
            match attempt {
                Ok(value) => return Ok(value),
                Err(errors) if !errors.is_empty() && nested.is_none() => nested = Some(errors),
                Err(_) => {}
            }
        }
        Err(nested.unwrap_or_else(|| vec![mismatch(path, data, schema)]))
    }

    fn coerce_object(
        &mut self,
        data: Value,
        typed: &TypedSchema,
        path: &[PathSegment],
        selection: &FieldSelection,
    ) -> Coerced {
        let Value::Object(object) = data else {
            return Err(Vec::new());
        };

        let empty = BTreeMap::new();
        let properties = typed.properties.as_ref().unwrap_or(&empty);
        let patterns = typed.pattern_properties.as_ref().filter(|p| !p.is_empty());
        if properties.is_empty() && patterns.is_none() {
            return Ok(Value::Object(object));
        }

        let mut result = Map::with_capacity(object.len());
        let mut errors = Vec::new();
        for (key, value) in object {
            let mut child_path = path.to_vec();
            child_path.push(PathSegment::Key(key.clone()));

            let child_schema = match properties.get(&key) {
                Some(schema) => schema.clone(),
                None => {
                    let matching = matching_pattern_schemas(patterns, &key);
                    if matching.is_empty() {
                        self.removed.insert(dot_path(&child_path));
                        continue;
                    }
                    SchemaFragment::AnyOf(matching)
                }
            };

            let source_type = selection.source_types.get(&dot_path(&child_path)).copied();
            match self.coerce(value, &child_schema, &child_path, selection, source_type) {
                Ok(coerced) => {
                    result.insert(key, coerced);
                }
                Err(child_errors) => errors.extend(child_errors),
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(result))
        } else {
            Err(errors)
        }
    }

    fn coerce_array(
        &mut self,
        data: Value,
        typed: &TypedSchema,
        path: &[PathSegment],
        selection: &FieldSelection,
    ) -> Coerced {
        let Value::Array(items) = data else {
            return Err(Vec::new());
        };

        let item_schema = typed
            .items
            .as_deref()
            .cloned()
            .unwrap_or(SchemaFragment::Unconstrained);
        let mut result = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let mut child_path = path.to_vec();
            child_path.push(PathSegment::Index(index));
            match self.coerce(item, &item_schema, &child_path, selection, None) {
                Ok(coerced) => result.push(coerced),
                Err(child_errors) => errors.extend(child_errors),
            }
        }

        if errors.is_empty() {
            Ok(Value::Array(result))
        } else {
            Err(errors)
        }
    }

    /// Log filtered and removed paths collected so far at debug level
    pub fn log_summary(&self) {
        if !self.filtered.is_empty() {
            debug!(
                count = self.filtered.len(),
                paths = ?self.filtered,
                "Filtered paths during transforms as they were unsupported or not selected"
            );
        }
        if !self.removed.is_empty() {
            debug!(
                count = self.removed.len(),
                paths = ?self.removed,
                "Removed paths during transforms"
            );
        }
    }

    /// Log the summary and forget collected paths
    pub fn cleanup(&mut self) {
        self.log_summary();
        self.removed.clear();
        self.filtered.clear();
    }
}

trait OrDefaultErrors {
    fn ok_or_default(self) -> Coerced;
}

impl OrDefaultErrors for Option<Value> {
    fn ok_or_default(self) -> Coerced {
        self.ok_or_else(Vec::new)
    }
}

fn mismatch(path: &[PathSegment], data: Value, schema: &SchemaFragment) -> Mismatch {
    Mismatch {
        path: path.to_vec(),
        data,
        schema: schema.to_value(),
    }
}

fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == NULL_LITERAL,
        _ => false,
    }
}

fn permits_null(schema: &SchemaFragment) -> bool {
    match schema {
        SchemaFragment::Unconstrained => false,
        SchemaFragment::AnyOf(options) => options.iter().any(permits_null),
        SchemaFragment::Typed(typed) => typed.types.contains(&JsonType::Null),
    }
}

fn matching_pattern_schemas(
    patterns: Option<&BTreeMap<String, SchemaFragment>>,
    key: &str,
) -> Vec<SchemaFragment> {
    let Some(patterns) = patterns else {
        return Vec::new();
    };
    patterns
        .iter()
        .filter(|(pattern, _)| {
            // patterns must match at the start of the key
            Regex::new(&format!("^(?:{pattern})"))
                .map(|re| re.is_match(key))
                .unwrap_or(false)
        })
        .map(|(_, schema)| schema.clone())
        .collect()
}

/// Dot path used for source type lookups: keys joined by `.`, arrays as `[]`
fn dot_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(_) => out.push_str("[]"),
        }
    }
    out
}

/// Convert a value to a scalar JSON type, `None` when it does not fit
fn convert_scalar(data: &Value, json_type: JsonType) -> Option<Value> {
    match json_type {
        JsonType::String => match data {
            Value::Null => None,
            Value::String(s) => Some(Value::String(s.clone())),
            other => Some(Value::String(other.to_string())),
        },
        JsonType::Integer => match data {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(Value::Number(n.clone()))
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| Value::from(f as i64))
                }
            }
            Value::String(s) => {
                let cleaned = s.replace(',', "");
                let cleaned = cleaned.trim();
                cleaned
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| cleaned.parse::<u64>().map(Value::from))
                    .ok()
            }
            _ => None,
        },
        JsonType::Number => {
            let parsed = match data {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.replace(',', "").trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed.and_then(Number::from_f64).map(Value::Number)
        }
        JsonType::Boolean => Some(Value::Bool(match data {
            Value::String(s) if s.eq_ignore_ascii_case("false") => false,
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        })),
        JsonType::Null | JsonType::Object | JsonType::Array => None,
    }
}

/// Convert a value to an arbitrary-precision decimal string
fn convert_decimal(data: &Value) -> Option<Value> {
    let text = match data {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let special = match text.to_ascii_lowercase().as_str() {
        "nan" | "snan" | "-nan" => Some("NaN"),
        "inf" | "infinity" | "+inf" | "+infinity" => Some("Infinity"),
        "-inf" | "-infinity" => Some("-Infinity"),
        _ => None,
    };
    if let Some(special) = special {
        return Some(Value::String(special.to_string()));
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .map(|d| Value::String(d.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> SchemaFragment {
        SchemaFragment::from_value(&value).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn transform(data: Value, schema_value: Value) -> Result<Record, SchemaMismatch> {
        Transformer::new().transform(record(data), &schema(schema_value), &FieldSelection::new())
    }

    #[test]
    fn test_type_priority() {
        let out = transform(
            json!({"a": "42", "b": "abc", "c": ""}),
            json!({"type": "object", "properties": {
                "a": {"type": ["integer", "string", "null"]},
                "b": {"type": ["integer", "string", "null"]},
                "c": {"type": ["null", "integer", "string"]},
            }}),
        )
        .unwrap();
        assert_eq!(out["a"], json!(42));
        assert_eq!(out["b"], json!("abc"));
        assert_eq!(out["c"], Value::Null);
    }

    #[test]
    fn test_scalar_conversions() {
        let out = transform(
            json!({
                "int": "1,234",
                "num": "1,234.5",
                "flag_false": "FALSE",
                "flag_true": "yes",
                "text": 12,
                "null_literal": "<null>",
            }),
            json!({"type": "object", "properties": {
                "int": {"type": ["null", "integer"]},
                "num": {"type": ["null", "number"]},
                "flag_false": {"type": ["null", "boolean"]},
                "flag_true": {"type": ["null", "boolean"]},
                "text": {"type": ["null", "string"]},
                "null_literal": {"type": ["null", "string"]},
            }}),
        )
        .unwrap();
        assert_eq!(out["int"], json!(1234));
        assert_eq!(out["num"], json!(1234.5));
        assert_eq!(out["flag_false"], json!(false));
        assert_eq!(out["flag_true"], json!(true));
        assert_eq!(out["text"], json!("12"));
        assert_eq!(out["null_literal"], Value::Null);
    }

    #[test]
    fn test_date_time_any_of() {
        let date_schema = json!({"anyOf": [
            {"type": ["null", "string"], "format": "date-time"},
            {"type": ["null", "string"]}
        ]});
        let out = transform(
            json!({"good": "2021-03-04 05:06:07", "bad": "whenever", "empty": ""}),
            json!({"type": "object", "properties": {
                "good": date_schema.clone(),
                "bad": date_schema.clone(),
                "empty": date_schema,
            }}),
        )
        .unwrap();
        assert_eq!(out["good"], json!("2021-03-04T05:06:07.000000Z"));
        assert_eq!(out["bad"], json!("whenever"));
        assert_eq!(out["empty"], Value::Null);
    }

    #[test]
    fn test_decimal_format() {
        let out = transform(
            json!({"a": "1.50", "b": "NaN", "c": 2.25, "d": "1e3"}),
            json!({"type": "object", "properties": {
                "a": {"type": ["null", "string"], "format": "singer.decimal"},
                "b": {"type": ["null", "string"], "format": "singer.decimal"},
                "c": {"type": ["null", "string"], "format": "singer.decimal"},
                "d": {"type": ["null", "string"], "format": "singer.decimal"},
            }}),
        )
        .unwrap();
        assert_eq!(out["a"], json!("1.50"));
        assert_eq!(out["b"], json!("NaN"));
        assert_eq!(out["c"], json!("2.25"));
        assert_eq!(out["d"], json!("1000"));
    }

    #[test]
    fn test_mismatches_are_aggregated() {
        let err = transform(
            json!({"a": "x", "b": "y", "tags": ["1", "z"], "ok": "1"}),
            json!({"type": "object", "properties": {
                "a": {"type": ["null", "integer"]},
                "b": {"type": "number"},
                "tags": {"type": ["null", "array"], "items": {"type": "integer"}},
                "ok": {"type": "integer"},
            }}),
        )
        .unwrap_err();
        let mut paths = err.paths();
        paths.sort();
        assert_eq!(paths, vec!["a", "b", "tags.1"]);
    }

    #[test]
    fn test_removed_and_unconstrained() {
        let mut transformer = Transformer::new();
        let out = transformer
            .transform(
                record(json!({"known": {"x": 1}, "extra": 5, "free": [1, "a"]})),
                &schema(json!({"type": "object", "properties": {
                    "known": {"type": "object", "properties": {}},
                    "free": {},
                }})),
                &FieldSelection::new(),
            )
            .unwrap();
        assert_eq!(out["known"], json!({"x": 1}));
        assert_eq!(out["free"], json!([1, "a"]));
        assert!(!out.contains_key("extra"));
        assert!(transformer.removed().contains("extra"));
    }

    #[test]
    fn test_pattern_properties() {
        let out = transform(
            json!({"x_count": "3", "other": "4"}),
            json!({"type": "object", "properties": {},
                   "patternProperties": {"^x_": {"type": "integer"}}}),
        )
        .unwrap();
        assert_eq!(out["x_count"], json!(3));
        assert!(!out.contains_key("other"));
    }

    #[test]
    fn test_filter_respects_automatic_and_is_idempotent() {
        let selection = FieldSelection::new()
            .with_automatic(&["properties", "id"])
            .with_filtered(&["properties", "secret"])
            .with_filtered(&["properties", "nested", "properties", "hidden"])
            .with_filtered(&["properties", "list", "items", "properties", "drop"]);
        let input = record(json!({
            "id": 1,
            "secret": "s",
            "nested": {"hidden": 1, "shown": 2},
            "list": [{"drop": 1, "keep": 2}],
        }));

        let mut transformer = Transformer::new();
        let once = transformer.filter_record(input, &selection);
        let twice = transformer.filter_record(once.clone(), &selection);
        assert_eq!(once, twice);
        assert_eq!(
            Value::Object(once),
            json!({"id": 1, "nested": {"shown": 2}, "list": [{"keep": 2}]})
        );
        assert!(transformer.filtered().contains("secret"));
        assert!(transformer.filtered().contains("list[].drop"));
    }

    #[test]
    fn test_source_type_overrides_schema() {
        let mut selection = FieldSelection::new();
        selection.source_types.insert("code".to_string(), JsonType::String);
        let out = Transformer::new()
            .transform(
                record(json!({"code": 7})),
                &schema(json!({"type": "object", "properties": {"code": {"type": ["null", "integer"]}}})),
                &selection,
            )
            .unwrap();
        assert_eq!(out["code"], json!("7"));
    }

    #[test]
    fn test_integer_rejects_fractional() {
        assert_eq!(convert_scalar(&json!("4.5"), JsonType::Integer), None);
        assert_eq!(convert_scalar(&json!(4.0), JsonType::Integer), Some(json!(4)));
        assert_eq!(convert_scalar(&json!(true), JsonType::Integer), None);
        assert_eq!(convert_scalar(&json!("nan"), JsonType::Number), None);
    }
}
