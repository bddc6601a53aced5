//! Field selection derived from catalog metadata

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::catalog::{Breadcrumb, Inclusion, MetadataEntry};
use crate::schema::JsonType;

/// Which breadcrumbs are always emitted, which are dropped, and which carry a
/// forced source type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub automatic: HashSet<Breadcrumb>,
    pub filtered: HashSet<Breadcrumb>,
    /// Dot path (`a.b`, `list[].field`) to the type values are coerced to
    pub source_types: HashMap<String, JsonType>,
}

impl FieldSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a breadcrumb as always emitted
    pub fn with_automatic(mut self, breadcrumb: &[&str]) -> Self {
        self.automatic.insert(to_breadcrumb(breadcrumb));
        self
    }

    /// Mark a breadcrumb as dropped
    pub fn with_filtered(mut self, breadcrumb: &[&str]) -> Self {
        self.filtered.insert(to_breadcrumb(breadcrumb));
        self
    }
}

fn to_breadcrumb(parts: &[&str]) -> Breadcrumb {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Dot notation for a breadcrumb: `["properties", "a", "items", "properties", "b"]`
/// becomes `a[].b`
pub fn breadcrumb_path(breadcrumb: &[String]) -> String {
    let mut path = String::new();
    let mut parts = breadcrumb.iter().peekable();
    while let Some(part) = parts.next() {
        match part.as_str() {
            "properties" if parts.peek().is_some() => {
                if !path.is_empty() {
                    path.push('.');
                }
                if let Some(name) = parts.next() {
                    path.push_str(name);
                }
            }
            "items" => path.push_str("[]"),
            other => {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(other);
            }
        }
    }
    path
}

/// Resolve catalog metadata into a [`FieldSelection`]
///
/// A breadcrumb is automatic when its own inclusion is `automatic` or any
/// ancestor is automatic. Otherwise it is filtered when `selected` is false or
/// the inclusion is `unsupported`.
pub fn resolve_filter_fields(metadata: &[MetadataEntry]) -> FieldSelection {
    let mut selection = FieldSelection::new();

    let mut entries: Vec<&MetadataEntry> = metadata
        .iter()
        .filter(|entry| !entry.breadcrumb.is_empty())
        .collect();
    entries.sort_by_key(|entry| entry.breadcrumb.len());

    for entry in entries {
        let breadcrumb = &entry.breadcrumb;
        let ancestor_automatic = (1..=(breadcrumb.len() - 1) / 2)
            .map(|level| breadcrumb.len() - 2 * level)
            .any(|len| selection.automatic.contains(&breadcrumb[..len]));

        let inclusion = entry.metadata.inclusion;
        if ancestor_automatic || inclusion == Some(Inclusion::Automatic) {
            selection.automatic.insert(breadcrumb.clone());
            continue;
        }

        if entry.metadata.selected == Some(false) || inclusion == Some(Inclusion::Unsupported) {
            selection.filtered.insert(breadcrumb.clone());
        }

        if let Some(source_type) = &entry.metadata.source_type {
            match JsonType::parse(source_type) {
                Some(json_type) => {
                    selection
                        .source_types
                        .insert(breadcrumb_path(breadcrumb), json_type);
                }
                None => warn!(
                    breadcrumb = %breadcrumb_path(breadcrumb),
                    source_type = %source_type,
                    "Ignoring unknown source_type"
                ),
            }
        }
    }

    selection
}
