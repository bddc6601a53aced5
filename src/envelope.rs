//! Bookkeeping fields added to every emitted record

use std::collections::BTreeMap;

use crate::schema::{JsonType, SchemaFragment};

/// Bucket the record was read from
pub const SDC_SOURCE_BUCKET: &str = "_sdc_source_bucket";
/// Object key the record was read from
pub const SDC_SOURCE_FILE: &str = "_sdc_source_file";
/// 1-based physical line of the record (the CSV header is line 1)
pub const SDC_SOURCE_LINENO: &str = "_sdc_source_lineno";
/// Values without a column of their own
pub const SDC_EXTRA: &str = "_sdc_extra";

/// All envelope field names
pub const ENVELOPE_FIELDS: [&str; 4] = [SDC_SOURCE_BUCKET, SDC_SOURCE_FILE, SDC_SOURCE_LINENO, SDC_EXTRA];

/// Schema fragments for the envelope fields
pub fn envelope_schema() -> BTreeMap<String, SchemaFragment> {
    let extra_item = SchemaFragment::AnyOf(vec![
        SchemaFragment::object(BTreeMap::new()),
        SchemaFragment::typed(&[JsonType::String]),
    ]);
    BTreeMap::from([
        (SDC_SOURCE_BUCKET.to_string(), SchemaFragment::typed(&[JsonType::String])),
        (SDC_SOURCE_FILE.to_string(), SchemaFragment::typed(&[JsonType::String])),
        (SDC_SOURCE_LINENO.to_string(), SchemaFragment::typed(&[JsonType::Integer])),
        (SDC_EXTRA.to_string(), SchemaFragment::array(extra_item)),
    ])
}

/// Whether a column name is one of the envelope fields
pub fn is_envelope_field(name: &str) -> bool {
    ENVELOPE_FIELDS.contains(&name)
}
