//! JSON Schema fragments
//!
//! The subset of JSON Schema the tap produces during discovery and consumes
//! while transforming records: `type` (a single name or a list), `format`,
//! `properties`, `patternProperties`, `items` and `anyOf`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A JSON Schema primitive type name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

impl JsonType {
    /// Schema spelling of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Object => "object",
            JsonType::Array => "array",
        }
    }

    /// Parse a schema type name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            _ => None,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema carrying a `type` declaration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedSchema {
    /// Permitted types, in priority order
    pub types: Vec<JsonType>,
    /// String format (`date-time`, `singer.decimal`, ...)
    pub format: Option<String>,
    /// Object properties
    pub properties: Option<BTreeMap<String, SchemaFragment>>,
    /// Object properties keyed by regex
    pub pattern_properties: Option<BTreeMap<String, SchemaFragment>>,
    /// Array element schema
    pub items: Option<Box<SchemaFragment>>,
}

/// A JSON Schema fragment
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaFragment {
    /// `{"type": ...}` with optional format / properties / items
    Typed(TypedSchema),
    /// `{"anyOf": [...]}`
    AnyOf(Vec<SchemaFragment>),
    /// `{}`: accepts anything unchanged
    Unconstrained,
}

impl SchemaFragment {
    /// `{"type": [..types]}`
    pub fn typed(types: &[JsonType]) -> Self {
        SchemaFragment::Typed(TypedSchema {
            types: types.to_vec(),
            ..TypedSchema::default()
        })
    }

    /// `{"type": ["null", "string"]}`
    pub fn nullable_string() -> Self {
        Self::typed(&[JsonType::Null, JsonType::String])
    }

    /// `{"type": "object", "properties": {..}}`
    pub fn object(properties: BTreeMap<String, SchemaFragment>) -> Self {
        SchemaFragment::Typed(TypedSchema {
            types: vec![JsonType::Object],
            properties: Some(properties),
            ..TypedSchema::default()
        })
    }

    /// `{"type": "array", "items": {..}}`
    pub fn array(items: SchemaFragment) -> Self {
        SchemaFragment::Typed(TypedSchema {
            types: vec![JsonType::Array],
            items: Some(Box::new(items)),
            ..TypedSchema::default()
        })
    }

    /// Attach a format to a typed schema; other variants are returned unchanged
    pub fn with_format(self, format: impl Into<String>) -> Self {
        match self {
            SchemaFragment::Typed(mut typed) => {
                typed.format = Some(format.into());
                SchemaFragment::Typed(typed)
            }
            other => other,
        }
    }

    /// Declared object properties, if any
    pub fn properties(&self) -> Option<&BTreeMap<String, SchemaFragment>> {
        match self {
            SchemaFragment::Typed(typed) => typed.properties.as_ref(),
            _ => None,
        }
    }

    /// Mutable access to declared object properties
    pub fn properties_mut(&mut self) -> Option<&mut BTreeMap<String, SchemaFragment>> {
        match self {
            SchemaFragment::Typed(typed) => typed.properties.as_mut(),
            _ => None,
        }
    }

    /// Convert to a JSON value
    pub fn to_value(&self) -> Value {
        match self {
            SchemaFragment::Unconstrained => Value::Object(Map::new()),
            SchemaFragment::AnyOf(options) => {
                let mut map = Map::new();
                map.insert(
                    "anyOf".to_string(),
                    Value::Array(options.iter().map(SchemaFragment::to_value).collect()),
                );
                Value::Object(map)
            }
            SchemaFragment::Typed(typed) => {
                let mut map = Map::new();
                let type_value = match typed.types.as_slice() {
                    [single] => Value::String(single.as_str().to_string()),
                    many => Value::Array(
                        many.iter()
                            .map(|t| Value::String(t.as_str().to_string()))
                            .collect(),
                    ),
                };
                map.insert("type".to_string(), type_value);
                if let Some(format) = &typed.format {
                    map.insert("format".to_string(), Value::String(format.clone()));
                }
                if let Some(properties) = &typed.properties {
                    map.insert("properties".to_string(), properties_value(properties));
                }
                if let Some(patterns) = &typed.pattern_properties {
                    map.insert("patternProperties".to_string(), properties_value(patterns));
                }
                if let Some(items) = &typed.items {
                    map.insert("items".to_string(), items.to_value());
                }
                Value::Object(map)
            }
        }
    }

    /// Parse from a JSON value
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| format!("schema must be an object, found {value}"))?;

        if let Some(options) = map.get("anyOf") {
            let options = options
                .as_array()
                .ok_or_else(|| "anyOf must be an array".to_string())?;
            return options
                .iter()
                .map(SchemaFragment::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(SchemaFragment::AnyOf);
        }

        let Some(type_value) = map.get("type") else {
            return Ok(SchemaFragment::Unconstrained);
        };

        let names: Vec<&str> = match type_value {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names
                .iter()
                .map(|n| n.as_str().ok_or_else(|| format!("invalid type entry {n}")))
                .collect::<Result<_, _>>()?,
            other => return Err(format!("invalid type declaration {other}")),
        };
        let types = names
            .into_iter()
            .map(|name| JsonType::parse(name).ok_or_else(|| format!("unknown type {name:?}")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SchemaFragment::Typed(TypedSchema {
            types,
            format: map.get("format").and_then(Value::as_str).map(str::to_string),
            properties: map.get("properties").map(parse_properties).transpose()?,
            pattern_properties: map
                .get("patternProperties")
                .map(parse_properties)
                .transpose()?,
            items: map
                .get("items")
                .map(|items| SchemaFragment::from_value(items).map(Box::new))
                .transpose()?,
        }))
    }
}

fn properties_value(properties: &BTreeMap<String, SchemaFragment>) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(name, schema)| (name.clone(), schema.to_value()))
            .collect(),
    )
}

fn parse_properties(value: &Value) -> Result<BTreeMap<String, SchemaFragment>, String> {
    let map = value
        .as_object()
        .ok_or_else(|| "properties must be an object".to_string())?;
    map.iter()
        .map(|(name, schema)| Ok((name.clone(), SchemaFragment::from_value(schema)?)))
        .collect()
}

impl fmt::Display for SchemaFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl Serialize for SchemaFragment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SchemaFragment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SchemaFragment::from_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_and_list_type_forms() {
        let single = SchemaFragment::from_value(&json!({"type": "integer"})).unwrap();
        assert_eq!(single, SchemaFragment::typed(&[JsonType::Integer]));
        assert_eq!(single.to_value(), json!({"type": "integer"}));

        let list = SchemaFragment::from_value(&json!({"type": ["null", "string"]})).unwrap();
        assert_eq!(list, SchemaFragment::nullable_string());
    }

    #[test]
    fn test_nested_schema_parses() {
        let value = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": ["null", "string"]}},
                "ts": {"anyOf": [
                    {"type": ["null", "string"], "format": "date-time"},
                    {"type": ["null", "string"]}
                ]},
                "anything": {}
            },
            "patternProperties": {"^x_": {"type": "string"}}
        });
        let schema: SchemaFragment = serde_json::from_value(value.clone()).unwrap();
        let properties = schema.properties().unwrap();
        assert!(matches!(properties["ts"], SchemaFragment::AnyOf(ref o) if o.len() == 2));
        assert_eq!(properties["anything"], SchemaFragment::Unconstrained);
        assert_eq!(serde_json::to_value(&schema).unwrap(), value);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(SchemaFragment::from_value(&json!({"type": "decimal"})).is_err());
        assert!(SchemaFragment::from_value(&json!("string")).is_err());
    }
}
