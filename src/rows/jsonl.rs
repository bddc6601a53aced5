//! JSON lines row iterator

use std::io::{BufRead, BufReader, Read};

use serde_json::Value;

use crate::error::FileError;

use super::Row;

/// Lazy iterator over the records of one JSON lines file
///
/// Blank lines and empty objects are skipped. A line that is not a JSON object
/// fails the whole file: the error is yielded once and iteration stops.
pub struct JsonlRowIterator<R: Read> {
    reader: BufReader<R>,
    path: String,
    line: Vec<u8>,
    line_number: u64,
    finished: bool,
}

impl<R: Read> JsonlRowIterator<R> {
    pub fn new(stream: R, path: impl Into<String>) -> Self {
        Self {
            reader: BufReader::new(stream),
            path: path.into(),
            line: Vec::new(),
            line_number: 0,
            finished: false,
        }
    }

    fn fail(&mut self, reason: impl ToString) -> Option<Result<Row, FileError>> {
        self.finished = true;
        Some(Err(FileError::decode(&self.path, reason)))
    }
}

impl<R: Read> Iterator for JsonlRowIterator<R> {
    type Item = Result<Row, FileError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => return self.fail(e),
            }
            self.line_number += 1;

            let text = match std::str::from_utf8(&self.line) {
                Ok(text) => text.trim(),
                Err(e) => {
                    let reason = format!("line {}: {e}", self.line_number);
                    return self.fail(reason);
                }
            };
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(record)) if record.is_empty() => continue,
                Ok(Value::Object(record)) => {
                    return Some(Ok(Row {
                        line_number: self.line_number,
                        record,
                    }));
                }
                Ok(other) => {
                    let reason = format!("line {}: expected a JSON object, found {other}", self.line_number);
                    return self.fail(reason);
                }
                Err(e) => {
                    let reason = format!("line {}: {e}", self.line_number);
                    return self.fail(reason);
                }
            }
        }
        None
    }
}
