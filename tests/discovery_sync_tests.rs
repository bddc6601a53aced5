//! Discovery and sync tests against the in-memory store

use std::io::{Cursor, Write};

use chrono::{DateTime, TimeZone, Utc};
use flate2::GzBuilder;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use s3_csv_tap::catalog::{Catalog, Inclusion, discover_streams};
use s3_csv_tap::sampling::get_sampled_schema_for_table;
use s3_csv_tap::source::SkipCounter;
use s3_csv_tap::storage::MemoryObjectStore;
use s3_csv_tap::sync::{MemoryWriter, Message, State, sync_catalog};
use s3_csv_tap::{SortOrder, TableSpec, TapConfig};

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 8, 0, 0).unwrap()
}

fn gzip(inner_name: Option<&str>, data: &[u8]) -> Vec<u8> {
    match inner_name {
        Some(name) => {
            let mut encoder = GzBuilder::new()
                .filename(name)
                .write(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        None => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
    }
}

fn zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn select_all(catalog: &mut Catalog) {
    for stream in &mut catalog.streams {
        stream.set_selected(true);
    }
}

fn records(writer: &MemoryWriter, stream: &str) -> Vec<Value> {
    writer
        .records(stream)
        .into_iter()
        .map(|record| Value::Object(record.clone()))
        .collect()
}

mod end_to_end {
    use super::*;

    fn setup() -> (MemoryObjectStore, TapConfig) {
        let store = MemoryObjectStore::new("test-bucket").with_object(
            "data.csv",
            "id,name\n1,Alice\n2,\n",
            at(1),
        );
        let config = TapConfig::new("test-bucket")
            .with_table(TableSpec::new("data", r"data\.csv$").with_key_properties(["id"]));
        (store, config)
    }

    #[test]
    fn test_discovery_schema_and_metadata() {
        let (store, config) = setup();
        let catalog = discover_streams(&store, &config).unwrap();
        assert_eq!(catalog.streams.len(), 1);

        let stream = &catalog.streams[0];
        assert_eq!(stream.stream, "data");
        assert_eq!(stream.tap_stream_id, "data");

        let schema = serde_json::to_value(&stream.schema).unwrap();
        assert_eq!(schema["properties"]["id"], json!({"type": ["null", "integer", "string"]}));
        assert_eq!(schema["properties"]["name"], json!({"type": ["null", "string"]}));
        assert_eq!(schema["properties"]["_sdc_source_lineno"], json!({"type": "integer"}));

        let inclusion = |name: &str| {
            stream
                .metadata
                .iter()
                .find(|entry| entry.breadcrumb == vec!["properties".to_string(), name.to_string()])
                .and_then(|entry| entry.metadata.inclusion)
        };
        assert_eq!(inclusion("id"), Some(Inclusion::Automatic));
        assert_eq!(inclusion("name"), Some(Inclusion::Available));
        assert_eq!(stream.key_properties(), vec!["id"]);
    }

    #[test]
    fn test_sync_emits_typed_records() {
        let (store, config) = setup();
        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);

        let mut state = State::new();
        let mut writer = MemoryWriter::new();
        let total = sync_catalog(&store, &config, &catalog, &mut state, &mut writer).unwrap();
        assert_eq!(total, 2);

        assert!(matches!(writer.messages[0], Message::Schema { ref stream, .. } if stream == "data"));
        let rows = records(&writer, "data");
        assert_eq!(
            rows[0],
            json!({
                "id": 1,
                "name": "Alice",
                "_sdc_source_bucket": "test-bucket",
                "_sdc_source_file": "data.csv",
                "_sdc_source_lineno": 2
            })
        );
        assert_eq!(rows[1]["id"], json!(2));
        assert_eq!(rows[1]["name"], Value::Null);
        assert_eq!(rows[1]["_sdc_source_lineno"], json!(3));

        assert_eq!(state.modified_since("data").unwrap(), Some(at(1)));
    }

    #[test]
    fn test_catalog_survives_serialization() {
        let (store, config) = setup();
        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);
        let reloaded = Catalog::from_json_str(&catalog.to_json_pretty().unwrap()).unwrap();
        assert_eq!(reloaded, catalog);

        let mut writer = MemoryWriter::new();
        sync_catalog(&store, &config, &reloaded, &mut State::new(), &mut writer).unwrap();
        assert_eq!(records(&writer, "data").len(), 2);
    }
}

mod skipping {
    use super::*;

    #[test]
    fn test_tarballs_are_skipped_and_csvs_sampled() {
        let store = MemoryObjectStore::new("bucket")
            .with_object("batch/one.tar.gz", gzip(Some("one.tar"), b"binary"), at(1))
            .with_object("batch/two.tar.gz", gzip(Some("two.tar"), b"binary"), at(2))
            .with_object("batch/a.csv", "a\n1\n", at(3))
            .with_object("batch/b.csv", "b\nx\n", at(4))
            .with_object("batch/c.csv", "c\n1.5\n", at(5));
        let table = TableSpec::new("batch", "^batch/");
        let config = TapConfig::new("bucket").with_table(table.clone());

        let mut skips = SkipCounter::new();
        let schema = get_sampled_schema_for_table(&store, &config, &table, &mut skips).unwrap();
        assert_eq!(skips.count(), 2);
        let columns: Vec<&str> = schema.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsupported_files_do_not_abort_sync() {
        let store = MemoryObjectStore::new("bucket")
            .with_object("in/good.csv", "id\n1\n", at(1))
            .with_object("in/readme", "plain text", at(2))
            .with_object("in/data.parquet", "PAR1", at(3))
            .with_object("in/later.csv", "id\n2\n", at(4));
        let config = TapConfig::new("bucket").with_table(TableSpec::new("t", "^in/"));
        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);

        let mut writer = MemoryWriter::new();
        let total = sync_catalog(&store, &config, &catalog, &mut State::new(), &mut writer).unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_decode_failure_keeps_bookmark() {
        let store = MemoryObjectStore::new("bucket")
            .with_object("logs/a.jsonl", "{\"id\": 1}\n", at(1))
            .with_object("logs/b.jsonl", "{\"id\": 2}\nnot json\n", at(2));
        let table = TableSpec::new("logs", r"^logs/.*\.jsonl$");
        let config = TapConfig::new("bucket").with_table(table);
        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);

        let mut state = State::new();
        let mut writer = MemoryWriter::new();
        sync_catalog(&store, &config, &catalog, &mut state, &mut writer).unwrap();
        assert_eq!(state.modified_since("logs").unwrap(), Some(at(1)));
        assert_eq!(writer.states().len(), 1);
    }

    #[test]
    fn test_no_matching_files_is_fatal() {
        let store = MemoryObjectStore::new("bucket").with_object("a.csv", "id\n1\n", at(1));
        let config = TapConfig::new("bucket").with_table(TableSpec::new("t", r"\.tsv$"));
        let err = discover_streams(&store, &config).unwrap_err();
        assert!(err.to_string().contains("No files found"));
    }
}

mod compressed {
    use super::*;

    #[test]
    fn test_gzip_member_dispatched_by_inner_name() {
        let store = MemoryObjectStore::new("bucket")
            .with_object("gz/people.gz", gzip(Some("people.csv"), b"id,name\n1,Ann\n"), at(1))
            .with_object("gz/events.gz", gzip(Some("events.jsonl"), b"{\"id\": 2, \"kind\": \"x\"}\n"), at(2))
            .with_object("gz/noname.gz", gzip(None, b"id\n3\n"), at(3))
            .with_object("gz/nested.gz", gzip(Some("inner.csv.gz"), b"\x1f\x8b"), at(4));
        let config = TapConfig::new("bucket").with_table(TableSpec::new("gz", r"^gz/"));

        let mut skips = SkipCounter::new();
        let table = config.tables[0].clone();
        let schema = get_sampled_schema_for_table(&store, &config, &table, &mut skips).unwrap();
        assert_eq!(skips.count(), 2);
        assert!(schema.contains_key("name"));
        assert!(schema.contains_key("kind"));

        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);
        let mut writer = MemoryWriter::new();
        sync_catalog(&store, &config, &catalog, &mut State::new(), &mut writer).unwrap();
        let rows = records(&writer, "gz");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["_sdc_source_file"], json!("gz/people.gz"));
        assert_eq!(rows[0]["_sdc_source_lineno"], json!(2));
        assert_eq!(rows[1]["_sdc_source_lineno"], json!(1));
    }

    #[test]
    fn test_zip_members_expanded() {
        let archive = zip(&[
            ("a.csv", b"id,name\n1,Ann\n".as_slice()),
            ("b.jsonl", b"{\"id\": 2, \"name\": \"Bo\"}\n".as_slice()),
            ("inner.zip", b"PK".as_slice()),
            ("c.gz", b"\x1f\x8b".as_slice()),
        ]);
        let store = MemoryObjectStore::new("bucket").with_object("archive.zip", archive, at(1));
        let config = TapConfig::new("bucket")
            .with_table(TableSpec::new("z", r"\.zip$").with_key_properties(["id"]));

        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);
        let mut writer = MemoryWriter::new();
        let total = sync_catalog(&store, &config, &catalog, &mut State::new(), &mut writer).unwrap();
        assert_eq!(total, 2);

        let files: Vec<Value> = records(&writer, "z")
            .into_iter()
            .map(|r| r["_sdc_source_file"].clone())
            .collect();
        assert_eq!(files, vec![json!("archive.zip/a.csv"), json!("archive.zip/b.jsonl")]);
    }

    #[test]
    fn test_gzip_jsonl_member_checked_for_key_properties() {
        let store = MemoryObjectStore::new("bucket").with_object(
            "e/events.gz",
            gzip(Some("events.jsonl"), b"{\"name\": \"a\"}\n"),
            at(1),
        );
        let table = TableSpec::new("events", r"^e/").with_key_properties(["id"]);
        let config = TapConfig::new("bucket").with_table(table.clone());

        let err = get_sampled_schema_for_table(&store, &config, &table, &mut SkipCounter::new())
            .unwrap_err();
        assert!(err.to_string().contains("e/events.gz"));
        assert!(matches!(err, s3_csv_tap::TapError::JsonlMissingKeys { .. }));
    }

    #[test]
    fn test_broken_zip_member_does_not_drop_siblings() {
        let archive = zip(&[
            ("a.csv", b"id\n1\n".as_slice()),
            ("b.jsonl", b"{not json\n".as_slice()),
            ("c.csv", b"id\n3\n".as_slice()),
        ]);
        let store = MemoryObjectStore::new("bucket").with_object("archive.zip", archive, at(1));
        let config = TapConfig::new("bucket")
            .with_table(TableSpec::new("z", r"\.zip$").with_key_properties(["id"]));

        let mut catalog = discover_streams(&store, &config).unwrap();
        select_all(&mut catalog);
        let mut writer = MemoryWriter::new();
        let total = sync_catalog(&store, &config, &catalog, &mut State::new(), &mut writer).unwrap();
        assert_eq!(total, 2);

        let ids: Vec<Value> = records(&writer, "z").into_iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }
}

mod ordering {
    use super::*;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new("bucket")
            .with_object("export/part-2.csv", "id\n2\n", at(1))
            .with_object("export/part-1.csv", "id\n1\n", at(3))
            .with_object("export/part-3.csv", "id\n3\n", at(2))
    }

    fn synced_ids(config: &TapConfig, state: &mut State) -> Vec<Value> {
        let store = store();
        let mut catalog = discover_streams(&store, config).unwrap();
        select_all(&mut catalog);
        let mut writer = MemoryWriter::new();
        sync_catalog(&store, config, &catalog, state, &mut writer).unwrap();
        records(&writer, "export").into_iter().map(|r| r["id"].clone()).collect()
    }

    #[test]
    fn test_last_modified_order() {
        let config = TapConfig::new("bucket").with_table(TableSpec::new("export", r"^export/"));
        let ids = synced_ids(&config, &mut State::new());
        assert_eq!(ids, vec![json!(2), json!(3), json!(1)]);
    }

    #[test]
    fn test_key_order_keeps_newest_bookmark() {
        let config = TapConfig::new("bucket")
            .with_sort_order(SortOrder::Key)
            .with_table(TableSpec::new("export", r"^export/"));
        let mut state = State::new();
        let ids = synced_ids(&config, &mut state);
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(state.modified_since("export").unwrap(), Some(at(3)));
    }

    #[test]
    fn test_second_run_emits_nothing() {
        let config = TapConfig::new("bucket").with_table(TableSpec::new("export", r"^export/"));
        let mut state = State::new();
        assert_eq!(synced_ids(&config, &mut state).len(), 3);
        assert!(synced_ids(&config, &mut state).is_empty());
    }
}
