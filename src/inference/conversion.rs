//! Per-value type inference

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::types::{ItemTag, TypeTag};

static INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[0-9]+$").unwrap());

static FLOAT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?$").unwrap());

/// Infer the type tag of one sampled value
///
/// Returns `None` for `null` and the empty string, which carry no type
/// information. Values of columns listed in `date_overrides` infer as
/// `date-time` unless they are objects.
pub fn infer(column: &str, value: &Value, date_overrides: &HashSet<String>) -> Option<TypeTag> {
    match value {
        Value::Array(items) => Some(TypeTag::List(infer_list_item(column, items, date_overrides))),
        other => infer_scalar(column, other, date_overrides).map(TypeTag::from),
    }
}

fn infer_list_item(
    column: &str,
    items: &[Value],
    date_overrides: &HashSet<String>,
) -> Option<ItemTag> {
    match items.first()? {
        Value::Array(_) => {
            warn!(
                column = column,
                "Nested lists are not supported, treating elements as strings"
            );
            Some(ItemTag::String)
        }
        first => infer_scalar(column, first, date_overrides),
    }
}

fn infer_scalar(column: &str, value: &Value, date_overrides: &HashSet<String>) -> Option<ItemTag> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Object(_) => Some(ItemTag::Dict),
        _ if date_overrides.contains(column) => Some(ItemTag::DateTime),
        Value::String(s) => Some(classify(s)),
        Value::Number(n) => Some(classify(&n.to_string())),
        _ => Some(ItemTag::String),
    }
}

fn classify(text: &str) -> ItemTag {
    if INTEGER_REGEX.is_match(text) {
        ItemTag::Integer
    } else if FLOAT_REGEX.is_match(text) {
        ItemTag::Number
    } else {
        ItemTag::String
    }
}
