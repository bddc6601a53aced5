//! Row iteration and transform tests through the public API

use serde_json::{Value, json};

use s3_csv_tap::inference::{TypeTag, datatype_schema, infer, pick_datatype};
use s3_csv_tap::rows::{CsvRowIterator, RowOptions};
use s3_csv_tap::schema::SchemaFragment;
use s3_csv_tap::transform::{FieldSelection, Transformer};
use s3_csv_tap::Record;

fn csv_records(data: &str, options: &RowOptions) -> Vec<Value> {
    CsvRowIterator::new(data.as_bytes(), "test.csv", options)
        .unwrap()
        .map(|row| Value::Object(row.unwrap().record))
        .collect()
}

mod rows {
    use super::*;

    #[test]
    fn test_duplicate_header_value_relocated() {
        let records = csv_records("a,b,a\n1,2,3\n", &RowOptions::default());
        assert_eq!(records, vec![json!({"a": "1", "b": "2", "_sdc_extra": ["3"]})]);
    }

    #[test]
    fn test_short_row_leaves_columns_absent() {
        let records = csv_records("a,b,c\n1,2\n", &RowOptions::default());
        assert_eq!(records, vec![json!({"a": "1", "b": "2"})]);
    }

    #[test]
    fn test_long_row_overflows_into_extra() {
        let records = csv_records("a,b,c\n1,2,3,4,5\n", &RowOptions::default());
        assert_eq!(
            records,
            vec![json!({"a": "1", "b": "2", "c": "3", "_sdc_extra": ["4", "5"]})]
        );
    }

    #[test]
    fn test_nul_bytes_stripped() {
        let records = csv_records("a,b\n1\0,x\0y\n", &RowOptions::default());
        assert_eq!(records, vec![json!({"a": "1", "b": "xy"})]);
    }

    #[test]
    fn test_skipped_header_and_footer_lines() {
        let options = RowOptions {
            skip_header_row: 2,
            skip_footer_row: 1,
            ..RowOptions::default()
        };
        let rows: Vec<u64> = CsvRowIterator::new(
            "report generated today\nsecond banner\nid\n1\n2\ntotal: 2\n".as_bytes(),
            "report.csv",
            &options,
        )
        .unwrap()
        .map(|row| row.unwrap().line_number)
        .collect();
        assert_eq!(rows, vec![4, 5]);
    }
}

mod inference {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    #[test]
    fn test_infer_is_deterministic() {
        let overrides: HashSet<String> = HashSet::from(["when".to_string()]);
        for value in [json!("12"), json!("1.5e3"), json!("1,000"), json!("$5"), json!(["a"]), json!({"k": 1})] {
            let first = infer("col", &value, &overrides);
            assert_eq!(first, infer("col", &value, &overrides));
        }
        assert_eq!(infer("col", &json!("1,000"), &overrides), Some(TypeTag::String));
        assert_eq!(infer("when", &json!("12"), &overrides), Some(TypeTag::DateTime));
        assert_eq!(infer("col", &json!(""), &overrides), None);
    }

    #[test]
    fn test_numeric_widening() {
        let mixed = BTreeMap::from([(TypeTag::Integer, 3), (TypeTag::Number, 1)]);
        assert_eq!(pick_datatype(&mixed), TypeTag::Number);
        let ints = BTreeMap::from([(TypeTag::Integer, 4)]);
        assert_eq!(pick_datatype(&ints), TypeTag::Integer);
        let three = BTreeMap::from([
            (TypeTag::Integer, 3),
            (TypeTag::Number, 1),
            (TypeTag::String, 1),
        ]);
        assert_eq!(pick_datatype(&three), TypeTag::String);
    }

    #[test]
    fn test_scalar_schemas_are_nullable() {
        for tag in [TypeTag::Integer, TypeTag::Number, TypeTag::String] {
            let value = datatype_schema(tag).to_value();
            let types = value["type"].as_array().unwrap();
            assert!(types.contains(&json!("null")), "{tag}");
            assert!(types.contains(&json!("string")), "{tag}");
        }
    }
}

mod transform {
    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_integer_preferred_over_string() {
        let schema: SchemaFragment = serde_json::from_value(json!({
            "type": "object",
            "properties": {"n": {"type": ["integer", "string", "null"]}}
        }))
        .unwrap();
        let out = Transformer::new()
            .transform(record(json!({"n": "42"})), &schema, &FieldSelection::new())
            .unwrap();
        assert_eq!(out["n"], json!(42));
    }

    #[test]
    fn test_schema_mismatch_names_paths() {
        let schema: SchemaFragment = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "n": {"type": "integer"},
                "m": {"type": ["null", "number"]}
            }
        }))
        .unwrap();
        let err = Transformer::new()
            .transform(record(json!({"n": "x", "m": "y"})), &schema, &FieldSelection::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("n: \"x\" does not match"));
        assert!(message.contains("m: \"y\" does not match"));
    }

    #[test]
    fn test_filter_pass_is_idempotent() {
        let selection = FieldSelection::new()
            .with_automatic(&["properties", "id"])
            .with_filtered(&["properties", "id"])
            .with_filtered(&["properties", "drop"]);
        let input = record(json!({"id": 1, "drop": 2, "keep": {"x": [1, 2]}}));

        let mut transformer = Transformer::new();
        let once = transformer.filter_record(input, &selection);
        let twice = transformer.filter_record(once.clone(), &selection);
        assert_eq!(once, twice);
        assert_eq!(Value::Object(once), json!({"id": 1, "keep": {"x": [1, 2]}}));
    }
}
