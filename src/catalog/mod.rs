//! Discovery catalog
//!
//! The catalog is the persisted result of discovery: one stream per table with
//! its JSON Schema and per-breadcrumb metadata. It is read back before sync to
//! learn which streams and fields the consumer selected.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::{TableSpec, TapConfig};
use crate::envelope::envelope_schema;
use crate::error::TapResult;
use crate::inference::ResolvedSchema;
use crate::sampling::get_sampled_schema_for_table;
use crate::schema::SchemaFragment;
use crate::source::SkipCounter;
use crate::storage::ObjectStore;

/// Path into a schema: `[]` for the stream, `["properties", "col"]` for a column
pub type Breadcrumb = Vec<String>;

/// Whether a field is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    /// Always emitted (key properties)
    Automatic,
    /// Emitted when selected
    Available,
    /// Never emitted
    Unsupported,
}

/// Metadata attached to one breadcrumb
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<Inclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(
        rename = "table-key-properties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub table_key_properties: Option<Vec<String>>,
    /// Type every value of the field is coerced to, regardless of the schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Keys this crate does not interpret, kept for round trips
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl FieldMetadata {
    pub fn with_inclusion(inclusion: Inclusion) -> Self {
        Self {
            inclusion: Some(inclusion),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Breadcrumb,
    pub metadata: FieldMetadata,
}

/// One discovered stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub stream: String,
    pub tap_stream_id: String,
    pub schema: SchemaFragment,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl CatalogEntry {
    /// Metadata of the stream itself (empty breadcrumb)
    pub fn root_metadata(&self) -> Option<&FieldMetadata> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .map(|entry| &entry.metadata)
    }

    fn root_metadata_mut(&mut self) -> &mut FieldMetadata {
        if let Some(index) = self.metadata.iter().position(|e| e.breadcrumb.is_empty()) {
            return &mut self.metadata[index].metadata;
        }
        self.metadata.insert(
            0,
            MetadataEntry {
                breadcrumb: Vec::new(),
                metadata: FieldMetadata::default(),
            },
        );
        &mut self.metadata[0].metadata
    }

    /// Whether the consumer selected this stream
    pub fn is_selected(&self) -> bool {
        self.root_metadata()
            .and_then(|metadata| metadata.selected)
            .unwrap_or(false)
    }

    /// Select or deselect the stream
    pub fn set_selected(&mut self, selected: bool) {
        self.root_metadata_mut().selected = Some(selected);
    }

    /// Key properties recorded at discovery
    pub fn key_properties(&self) -> Vec<String> {
        self.root_metadata()
            .and_then(|metadata| metadata.table_key_properties.clone())
            .unwrap_or_default()
    }
}

/// Discovery output: every configured table as a stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse a catalog document
    pub fn from_json_str(json: &str) -> TapResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a catalog document from disk
    pub fn from_path(path: impl AsRef<Path>) -> TapResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_pretty(&self) -> TapResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Find a stream by name
    pub fn stream(&self, name: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|entry| entry.stream == name)
    }

    pub fn stream_mut(&mut self, name: &str) -> Option<&mut CatalogEntry> {
        self.streams.iter_mut().find(|entry| entry.stream == name)
    }

    /// Selected streams in catalog order
    pub fn selected_streams(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.streams.iter().filter(|entry| entry.is_selected())
    }
}

/// Discover the full record schema of a table: sampled columns plus envelope fields
pub fn discover_schema<S: ObjectStore + ?Sized>(
    store: &S,
    config: &TapConfig,
    table: &TableSpec,
    skips: &mut SkipCounter,
) -> TapResult<SchemaFragment> {
    let sampled = get_sampled_schema_for_table(store, config, table, skips)?;
    Ok(record_schema(sampled))
}

/// Object schema of the sampled columns merged with the envelope fields
///
/// Envelope fields replace sampled columns of the same name.
pub fn record_schema(sampled: ResolvedSchema) -> SchemaFragment {
    let mut properties: BTreeMap<String, SchemaFragment> = sampled;
    properties.extend(envelope_schema());
    SchemaFragment::object(properties)
}

/// Metadata for a discovered schema
///
/// The stream breadcrumb carries `table-key-properties`; key properties are
/// `automatic`, every other property `available`.
pub fn load_metadata(table: &TableSpec, schema: &SchemaFragment) -> Vec<MetadataEntry> {
    let mut entries = vec![MetadataEntry {
        breadcrumb: Vec::new(),
        metadata: FieldMetadata {
            table_key_properties: Some(table.key_properties.clone()),
            ..FieldMetadata::default()
        },
    }];

    if let Some(properties) = schema.properties() {
        for name in properties.keys() {
            let inclusion = if table.key_properties.contains(name) {
                Inclusion::Automatic
            } else {
                Inclusion::Available
            };
            entries.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), name.clone()],
                metadata: FieldMetadata::with_inclusion(inclusion),
            });
        }
    }
    entries
}

/// Discover every configured table
pub fn discover_streams<S: ObjectStore + ?Sized>(
    store: &S,
    config: &TapConfig,
) -> TapResult<Catalog> {
    config.validate()?;

    let mut skips = SkipCounter::new();
    let mut streams = Vec::with_capacity(config.tables.len());
    for table in &config.tables {
        info!("Discovering table {}", table.table_name);
        let schema = discover_schema(store, config, table, &mut skips)?;
        let metadata = load_metadata(table, &schema);
        streams.push(CatalogEntry {
            stream: table.table_name.clone(),
            tap_stream_id: table.table_name.clone(),
            schema,
            metadata,
        });
    }
    skips.report("sampling");

    Ok(Catalog { streams })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JsonType;
    use serde_json::json;

    #[test]
    fn test_load_metadata_marks_key_properties() {
        let table = TableSpec::new("people", "people\\.csv").with_key_properties(["id"]);
        let schema = record_schema(BTreeMap::from([
            ("id".to_string(), SchemaFragment::typed(&[JsonType::Null, JsonType::Integer, JsonType::String])),
            ("name".to_string(), SchemaFragment::nullable_string()),
        ]));

        let metadata = load_metadata(&table, &schema);
        assert_eq!(metadata[0].breadcrumb, Vec::<String>::new());
        assert_eq!(metadata[0].metadata.table_key_properties, Some(vec!["id".to_string()]));

        let inclusion = |name: &str| {
            metadata
                .iter()
                .find(|e| e.breadcrumb == vec!["properties".to_string(), name.to_string()])
                .and_then(|e| e.metadata.inclusion)
        };
        assert_eq!(inclusion("id"), Some(Inclusion::Automatic));
        assert_eq!(inclusion("name"), Some(Inclusion::Available));
        assert_eq!(inclusion("_sdc_source_file"), Some(Inclusion::Available));
    }

    #[test]
    fn test_envelope_overrides_sampled_columns() {
        let schema = record_schema(BTreeMap::from([(
            "_sdc_source_lineno".to_string(),
            SchemaFragment::nullable_string(),
        )]));
        let properties = schema.properties().unwrap();
        assert_eq!(
            properties["_sdc_source_lineno"],
            SchemaFragment::typed(&[JsonType::Integer])
        );
    }

    #[test]
    fn test_catalog_round_trip_and_selection() {
        let document = json!({"streams": [{
            "stream": "people",
            "tap_stream_id": "people",
            "schema": {"type": "object", "properties": {"id": {"type": ["null", "integer", "string"]}}},
            "metadata": [
                {"breadcrumb": [], "metadata": {"selected": true, "table-key-properties": ["id"], "forced-replication-method": "INCREMENTAL"}},
                {"breadcrumb": ["properties", "id"], "metadata": {"inclusion": "automatic"}}
            ]
        }, {
            "stream": "other",
            "tap_stream_id": "other",
            "schema": {"type": "object", "properties": {}},
            "metadata": []
        }]});

        let mut catalog: Catalog = serde_json::from_value(document.clone()).unwrap();
        let names: Vec<&str> = catalog.selected_streams().map(|s| s.stream.as_str()).collect();
        assert_eq!(names, vec!["people"]);
        assert_eq!(catalog.stream("people").unwrap().key_properties(), vec!["id"]);
        assert_eq!(serde_json::to_value(&catalog).unwrap(), document);

        catalog.stream_mut("other").unwrap().set_selected(true);
        assert_eq!(catalog.selected_streams().count(), 2);
    }
}
