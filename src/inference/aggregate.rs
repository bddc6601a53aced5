//! Folding type observations into a column schema

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::Record;
use crate::config::TableSpec;
use crate::schema::{JsonType, SchemaFragment};

use super::conversion::infer;
use super::types::{ItemTag, TypeTag};

/// Column name to JSON Schema fragment
pub type ResolvedSchema = BTreeMap<String, SchemaFragment>;

/// Per-column counts of observed type tags
///
/// Columns are registered on first sight even when the value carried no type
/// information, so an all-null column still appears (and resolves to `string`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCounts {
    columns: Vec<String>,
    counts: HashMap<String, BTreeMap<TypeTag, usize>>,
}

impl TypeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation for a column
    pub fn observe(&mut self, column: &str, tag: Option<TypeTag>) {
        if !self.counts.contains_key(column) {
            self.columns.push(column.to_string());
        }
        let tags = self.counts.entry(column.to_string()).or_default();
        if let Some(tag) = tag {
            *tags.entry(tag).or_insert(0) += 1;
        }
    }

    /// Tag counts for one column
    pub fn get(&self, column: &str) -> Option<&BTreeMap<TypeTag, usize>> {
        self.counts.get(column)
    }

    /// Columns in first-seen order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Add the observations of one sampled record to `counts`
pub fn count_sample(record: &Record, counts: &mut TypeCounts, table: &TableSpec) {
    let overrides = date_override_set(table);
    count_with_overrides(record, counts, &overrides);
}

fn count_with_overrides(record: &Record, counts: &mut TypeCounts, overrides: &HashSet<String>) {
    for (column, value) in record {
        counts.observe(column, infer(column, value, overrides));
    }
}

fn date_override_set(table: &TableSpec) -> HashSet<String> {
    table.date_overrides.iter().cloned().collect()
}

/// Tags that win outright when present, in priority order
const DOMINANT_TAGS: [TypeTag; 8] = [
    TypeTag::List(Some(ItemTag::DateTime)),
    TypeTag::List(Some(ItemTag::Dict)),
    TypeTag::List(Some(ItemTag::Integer)),
    TypeTag::List(Some(ItemTag::Number)),
    TypeTag::List(Some(ItemTag::String)),
    TypeTag::List(None),
    TypeTag::DateTime,
    TypeTag::Dict,
];

/// Resolve a column's observed tags to a single tag
///
/// Integer and number columns keep their numeric type (widening to `number`
/// when both were seen); any other mix falls back to `string`.
pub fn pick_datatype(counts: &BTreeMap<TypeTag, usize>) -> TypeTag {
    let seen = |tag: &TypeTag| counts.get(tag).copied().unwrap_or(0) > 0;

    if let Some(tag) = DOMINANT_TAGS.iter().find(|tag| seen(tag)) {
        return *tag;
    }

    let present: Vec<TypeTag> = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(tag, _)| *tag)
        .collect();

    match present.as_slice() {
        [TypeTag::Integer] => TypeTag::Integer,
        [TypeTag::Number] => TypeTag::Number,
        [TypeTag::Integer, TypeTag::Number] | [TypeTag::Number, TypeTag::Integer] => {
            TypeTag::Number
        }
        _ => TypeTag::String,
    }
}

/// JSON Schema fragment for a resolved tag
///
/// Every fragment also admits null and a plain string, so values that fail to
/// parse as the inferred type are still representable.
pub fn datatype_schema(tag: TypeTag) -> SchemaFragment {
    match tag {
        TypeTag::DateTime => SchemaFragment::AnyOf(vec![
            SchemaFragment::nullable_string().with_format("date-time"),
            SchemaFragment::nullable_string(),
        ]),
        TypeTag::Dict => SchemaFragment::AnyOf(vec![
            SchemaFragment::object(BTreeMap::new()),
            SchemaFragment::nullable_string(),
        ]),
        TypeTag::List(item) => {
            let items = item
                .map(|item| datatype_schema(item.into()))
                .unwrap_or_else(SchemaFragment::nullable_string);
            SchemaFragment::AnyOf(vec![
                SchemaFragment::array(items),
                SchemaFragment::nullable_string(),
            ])
        }
        TypeTag::Integer => {
            SchemaFragment::typed(&[JsonType::Null, JsonType::Integer, JsonType::String])
        }
        TypeTag::Number => {
            SchemaFragment::typed(&[JsonType::Null, JsonType::Number, JsonType::String])
        }
        TypeTag::String => SchemaFragment::nullable_string(),
    }
}

/// Count every sample and resolve each column to a schema fragment
pub fn generate_schema<'a, I>(samples: I, table: &TableSpec) -> ResolvedSchema
where
    I: IntoIterator<Item = &'a Record>,
{
    let overrides = date_override_set(table);
    let mut counts = TypeCounts::new();
    for record in samples {
        count_with_overrides(record, &mut counts, &overrides);
    }
    resolve_counts(&counts)
}

/// Resolve every counted column
pub fn resolve_counts(counts: &TypeCounts) -> ResolvedSchema {
    counts
        .columns()
        .filter_map(|column| {
            counts
                .get(column)
                .map(|tags| (column.to_string(), datatype_schema(pick_datatype(tags))))
        })
        .collect()
}
