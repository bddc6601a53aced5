//! Byte-range reader tests

use chrono::Utc;
use s3_csv_tap::range::read_range;
use s3_csv_tap::rows::RowOptions;
use s3_csv_tap::storage::MemoryObjectStore;

/// Deterministic split points for a file of `size` bytes
fn split_points(size: u64, parts: u64, seed: u64) -> Vec<u64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut points: Vec<u64> = (1..parts)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            1 + (state >> 33) % (size - 1)
        })
        .collect();
    points.push(0);
    points.push(size);
    points.sort_unstable();
    points.dedup();
    points
}

fn synthetic_file(rows: usize, eol: &str, trailing_eol: bool) -> (Vec<u8>, Vec<String>) {
    let header = format!("id,name,notes{eol}");
    let mut lines = Vec::with_capacity(rows);
    for i in 0..rows {
        let notes = "x".repeat(i % 7);
        let line = format!("{i},name-{},{notes}", i * 31 % 97);
        lines.push(line);
    }
    let mut body = header;
    for (i, line) in lines.iter().enumerate() {
        body.push_str(line);
        if i + 1 < rows || trailing_eol {
            body.push_str(eol);
        }
    }
    (body.into_bytes(), lines)
}

fn collect_workers(store: &MemoryObjectStore, points: &[u64], chunk: u64) -> Vec<Vec<String>> {
    points
        .windows(2)
        .map(|window| {
            let mut lines = read_range(store, "big.csv", window[0], window[1], chunk)
                .unwrap()
                .map(|line| String::from_utf8(line.unwrap()).unwrap());
            let header = lines.next().unwrap();
            assert!(header.starts_with("id,name,notes"));
            lines
                .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
                .collect()
        })
        .collect()
}

#[test]
fn test_every_row_read_exactly_once() {
    for (eol, trailing) in [("\n", true), ("\r\n", true), ("\r", true), ("\n", false), ("\r\n", false)] {
        let (data, expected) = synthetic_file(60, eol, trailing);
        let size = data.len() as u64;
        let store = MemoryObjectStore::new("bucket").with_object("big.csv", data, Utc::now());

        for seed in 0..12u64 {
            let parts = 2 + seed % 9;
            let points = split_points(size, parts, seed);
            for chunk in [1u64, 3, 16, 4096] {
                let workers = collect_workers(&store, &points, chunk);
                let all: Vec<String> = workers.into_iter().flatten().collect();
                assert_eq!(
                    all, expected,
                    "eol {eol:?} trailing {trailing} points {points:?} chunk {chunk}"
                );
            }
        }
    }
}

#[test]
fn test_split_on_every_offset() {
    let (data, expected) = synthetic_file(8, "\r\n", true);
    let size = data.len() as u64;
    let store = MemoryObjectStore::new("bucket").with_object("big.csv", data, Utc::now());

    for split in 1..size {
        let workers = collect_workers(&store, &[0, split, size], 5);
        let all: Vec<String> = workers.into_iter().flatten().collect();
        assert_eq!(all, expected, "split at {split}");
    }
}

#[test]
fn test_range_rows_keep_header_columns() {
    let (data, _) = synthetic_file(10, "\n", true);
    let size = data.len() as u64;
    let store = MemoryObjectStore::new("bucket").with_object("big.csv", data, Utc::now());

    let middle = size / 2;
    let mut ids = Vec::new();
    for (start, end) in [(0, middle), (middle, size)] {
        let rows = read_range(&store, "big.csv", start, end, 8)
            .unwrap()
            .into_rows(&RowOptions::default())
            .unwrap();
        for row in rows {
            let row = row.unwrap();
            assert!(row.record.contains_key("notes") || row.record.contains_key("name"));
            ids.push(row.record["id"].as_str().unwrap().to_string());
        }
    }
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}
