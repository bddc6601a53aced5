//! Observed value type tags

use std::fmt;

/// Type of a list's first element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemTag {
    Integer,
    Number,
    String,
    DateTime,
    Dict,
}

impl ItemTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemTag::Integer => "integer",
            ItemTag::Number => "number",
            ItemTag::String => "string",
            ItemTag::DateTime => "date-time",
            ItemTag::Dict => "dict",
        }
    }
}

/// The type observed for one sampled value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Integer,
    Number,
    String,
    DateTime,
    Dict,
    /// A list; `None` when the element type is unknown (empty list)
    List(Option<ItemTag>),
}

impl TypeTag {
    /// Parse a tag from its display form (`integer`, `list.dict`, ...)
    pub fn parse(tag: &str) -> Option<Self> {
        let scalar = |name: &str| match name {
            "integer" => Some(ItemTag::Integer),
            "number" => Some(ItemTag::Number),
            "string" => Some(ItemTag::String),
            "date-time" => Some(ItemTag::DateTime),
            "dict" => Some(ItemTag::Dict),
            _ => None,
        };
        if tag == "list" {
            return Some(TypeTag::List(None));
        }
        if let Some(item) = tag.strip_prefix("list.") {
            return scalar(item).map(|item| TypeTag::List(Some(item)));
        }
        scalar(tag).map(TypeTag::from)
    }
}

impl From<ItemTag> for TypeTag {
    fn from(item: ItemTag) -> Self {
        match item {
            ItemTag::Integer => TypeTag::Integer,
            ItemTag::Number => TypeTag::Number,
            ItemTag::String => TypeTag::String,
            ItemTag::DateTime => TypeTag::DateTime,
            ItemTag::Dict => TypeTag::Dict,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Integer => f.write_str("integer"),
            TypeTag::Number => f.write_str("number"),
            TypeTag::String => f.write_str("string"),
            TypeTag::DateTime => f.write_str("date-time"),
            TypeTag::Dict => f.write_str("dict"),
            TypeTag::List(None) => f.write_str("list"),
            TypeTag::List(Some(item)) => write!(f, "list.{}", item.as_str()),
        }
    }
}
