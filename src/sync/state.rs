//! Bookmark state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TapError, TapResult};
use crate::transform::{format_bookmark, parse_datetime};

/// Progress of one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Last modification time of the newest synced file (ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Tap state: bookmarks keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a state document; an empty document is an empty state
    pub fn from_json_str(json: &str) -> TapResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    /// Bookmark of a table, if any
    pub fn modified_since(&self, table: &str) -> TapResult<Option<DateTime<Utc>>> {
        let Some(raw) = self
            .bookmarks
            .get(table)
            .and_then(|bookmark| bookmark.modified_since.as_deref())
        else {
            return Ok(None);
        };
        parse_datetime(raw).map(Some).ok_or_else(|| {
            TapError::Config(format!(
                "invalid modified_since bookmark {raw:?} for table {table}"
            ))
        })
    }

    /// Advance a table's bookmark; it never moves backwards
    pub fn advance_modified_since(&mut self, table: &str, last_modified: DateTime<Utc>) -> TapResult<()> {
        let current = self.modified_since(table)?;
        if current.is_some_and(|current| current >= last_modified) {
            return Ok(());
        }
        self.bookmarks.entry(table.to_string()).or_default().modified_since =
            Some(format_bookmark(&last_modified));
        Ok(())
    }
}
