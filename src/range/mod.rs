//! Byte-range reading of large delimited files
//!
//! Large objects can be imported by several independent workers, each reading
//! the half-open byte range `[start, end)` of the same object. Every worker
//! first yields the file's header line, then the data lines that *start*
//! inside its range. A line that begins inside the range but ends past `end`
//! is completed by fetching further chunks. A line that began before `start`
//! belongs to the previous range and is discarded.
//!
//! When the ranges of all workers partition `[0, size)`, every data line is
//! emitted by exactly one worker, in file order within each worker.
//!
//! Lines are physical: a quoted value spanning several lines is split across
//! them. Line boundaries use the dominant end-of-line style of the file's first
//! [`EOL_SAMPLE_SIZE`] bytes, so all workers agree on them regardless of their
//! chunk size.

use std::io::{self, Read};

use tracing::debug;

use crate::error::{TapError, TapResult};
use crate::rows::{CsvRowIterator, RowOptions};
use crate::storage::{ObjectStore, StorageError};

/// Default fetch size for range workers
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Bytes inspected to detect the end-of-line style
pub const EOL_SAMPLE_SIZE: u64 = 64 * 1024;

/// End-of-line convention of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolStyle {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
    /// `\r`
    Cr,
}

impl EolStyle {
    fn terminator(&self) -> &'static [u8] {
        match self {
            EolStyle::Lf => b"\n",
            EolStyle::CrLf => b"\r\n",
            EolStyle::Cr => b"\r",
        }
    }
}

/// Detect the dominant end-of-line style of a sample
///
/// `\r\n` counts once as CRLF (not also as CR and LF). Defaults to LF when the
/// sample holds no line break.
pub fn detect_eol(sample: &[u8]) -> EolStyle {
    let (mut lf, mut crlf, mut cr) = (0usize, 0usize, 0usize);
    let mut i = 0;
    while i < sample.len() {
        match sample[i] {
            b'\r' if sample.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 1;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }

    if crlf > 0 && crlf >= lf && crlf >= cr {
        EolStyle::CrLf
    } else if cr > lf {
        EolStyle::Cr
    } else {
        EolStyle::Lf
    }
}

/// Position just past the first terminator at or after `from`
fn find_line_end(buf: &[u8], from: usize, eol: EolStyle) -> Option<usize> {
    let term = eol.terminator();
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(term.len())
        .position(|w| w == term)
        .map(|pos| from + pos + term.len())
}

/// Lines of one byte range, header first
pub struct RangeLines<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    key: String,
    end: u64,
    size: u64,
    chunk_size: u64,
    eol: EolStyle,
    header: Option<Vec<u8>>,
    /// Fetched bytes, starting at file offset `buf_offset`
    buf: Vec<u8>,
    buf_offset: u64,
    fetch_pos: u64,
    /// File offset of the next line to emit; None until the range start is aligned
    line_start: Option<u64>,
    range_start: u64,
    done: bool,
}

/// Open the byte range `[start, end)` of `key` for line-wise reading
///
/// Fails when `start` is not inside the object or `end <= start`.
pub fn read_range<'a, S: ObjectStore + ?Sized>(
    store: &'a S,
    key: &str,
    start: u64,
    end: u64,
    chunk_size: u64,
) -> TapResult<RangeLines<'a, S>> {
    let size = store.object_size(key)?;
    if start >= size || end <= start {
        return Err(StorageError::InvalidRange {
            key: key.to_string(),
            start,
            end,
            size,
        }
        .into());
    }
    if chunk_size == 0 {
        return Err(TapError::Config("chunk_size must be positive".to_string()));
    }

    let sample = store.read_range(key, 0, size.min(EOL_SAMPLE_SIZE))?;
    let eol = detect_eol(&sample);
    let header_end = match find_line_end(&sample, 0, eol) {
        Some(line_end) => line_end as u64,
        None => scan_line_end(store, key, sample.len() as u64, size, chunk_size, eol)?,
    };
    let header = if (header_end as usize) <= sample.len() {
        sample[..header_end as usize].to_vec()
    } else {
        store.read_range(key, 0, header_end)?
    };

    debug!(
        key = key,
        start = start,
        end = end,
        size = size,
        eol = ?eol,
        "Opened byte range"
    );

    Ok(RangeLines {
        store,
        key: key.to_string(),
        end: end.min(size),
        size,
        chunk_size,
        eol,
        header: Some(header),
        buf: Vec::new(),
        buf_offset: start.saturating_sub(2),
        fetch_pos: start.saturating_sub(2),
        line_start: if start == 0 { Some(header_end) } else { None },
        range_start: start,
        done: false,
    })
}

/// Find the end of the line that continues past `from` by fetching chunks
fn scan_line_end<S: ObjectStore + ?Sized>(
    store: &S,
    key: &str,
    from: u64,
    size: u64,
    chunk_size: u64,
    eol: EolStyle,
) -> Result<u64, StorageError> {
    // step back so a terminator split across the boundary is still seen
    let overlap = eol.terminator().len() as u64 - 1;
    let mut pos = from.saturating_sub(overlap);
    while pos < size {
        let chunk_end = size.min(pos + chunk_size.max(overlap + 1));
        let chunk = store.read_range(key, pos, chunk_end)?;
        if let Some(line_end) = find_line_end(&chunk, 0, eol) {
            let absolute = pos + line_end as u64;
            if absolute > from {
                return Ok(absolute);
            }
        }
        if chunk_end >= size {
            break;
        }
        pos = chunk_end - overlap;
    }
    Ok(size)
}

impl<'a, S: ObjectStore + ?Sized> RangeLines<'a, S> {
    /// Detected end-of-line style
    pub fn eol(&self) -> EolStyle {
        self.eol
    }

    /// Append the next chunk to the buffer; returns false at end of object
    fn fetch(&mut self) -> Result<bool, StorageError> {
        if self.fetch_pos >= self.size {
            return Ok(false);
        }
        let chunk_end = self.size.min(self.fetch_pos + self.chunk_size);
        let chunk = self.store.read_range(&self.key, self.fetch_pos, chunk_end)?;
        self.fetch_pos = chunk_end;
        self.buf.extend_from_slice(&chunk);
        Ok(true)
    }

    /// Drop buffered bytes before file offset `offset`
    fn discard_before(&mut self, offset: u64) {
        let n = (offset.saturating_sub(self.buf_offset) as usize).min(self.buf.len());
        self.buf.drain(..n);
        self.buf_offset += n as u64;
    }

    /// First line start at or after the range start
    fn align(&mut self) -> Result<Option<u64>, StorageError> {
        let mut from = 0usize;
        loop {
            while let Some(line_end) = find_line_end(&self.buf, from, self.eol) {
                let absolute = self.buf_offset + line_end as u64;
                if absolute >= self.range_start {
                    return Ok(Some(absolute));
                }
                from = line_end;
            }
            from = self.buf.len().saturating_sub(self.eol.terminator().len() - 1).max(from);
            if !self.fetch()? {
                return Ok(None);
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        let line_start = match self.line_start {
            Some(line_start) => line_start,
            None => match self.align()? {
                Some(line_start) => {
                    self.line_start = Some(line_start);
                    line_start
                }
                None => return Ok(None),
            },
        };
        if line_start >= self.end || line_start >= self.size {
            return Ok(None);
        }

        if self.buf_offset > line_start || self.fetch_pos < line_start {
            self.buf.clear();
            self.buf_offset = line_start;
            self.fetch_pos = line_start;
        } else {
            self.discard_before(line_start);
        }

        let mut from = 0usize;
        let line_end = loop {
            if let Some(line_end) = find_line_end(&self.buf, from, self.eol) {
                break line_end;
            }
            from = self.buf.len().saturating_sub(self.eol.terminator().len() - 1);
            if !self.fetch()? {
                break self.buf.len();
            }
        };
        if line_end == 0 {
            return Ok(None);
        }

        let line: Vec<u8> = self.buf.drain(..line_end).collect();
        self.buf_offset += line_end as u64;
        self.line_start = Some(self.buf_offset);
        Ok(Some(line))
    }

    /// Concatenate the header and lines into a byte stream
    pub fn into_reader(self) -> RangeReader<'a, S> {
        RangeReader {
            lines: self,
            current: Vec::new(),
            pos: 0,
        }
    }

    /// Parse the range as CSV rows, header first
    ///
    /// Leading and trailing line skipping does not apply to ranges; line numbers
    /// count from the header of the range.
    pub fn into_rows(self, options: &RowOptions) -> TapResult<CsvRowIterator<RangeReader<'a, S>>> {
        let path = self.key.clone();
        let options = RowOptions {
            skip_header_row: 0,
            skip_footer_row: 0,
            ..options.clone()
        };
        CsvRowIterator::new(self.into_reader(), path, &options)
    }
}

impl<S: ObjectStore + ?Sized> Iterator for RangeLines<'_, S> {
    type Item = Result<Vec<u8>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(Ok(header));
        }
        if self.done {
            return None;
        }
        match self.next_line() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// `Read` adapter over [`RangeLines`]
pub struct RangeReader<'a, S: ObjectStore + ?Sized> {
    lines: RangeLines<'a, S>,
    current: Vec<u8>,
    pos: usize,
}

impl<S: ObjectStore + ?Sized> Read for RangeReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.lines.next() {
                Some(Ok(line)) => {
                    self.current = line;
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(io::Error::other(e.to_string())),
                None => return Ok(0),
            }
        }
        let available = &self.current[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use chrono::Utc;

    fn store_with(data: &[u8]) -> MemoryObjectStore {
        MemoryObjectStore::new("bucket").with_object("f.csv", data.to_vec(), Utc::now())
    }

    fn lines(store: &MemoryObjectStore, start: u64, end: u64, chunk: u64) -> Vec<String> {
        read_range(store, "f.csv", start, end, chunk)
            .unwrap()
            .map(|line| String::from_utf8(line.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_detect_eol() {
        assert_eq!(detect_eol(b"a\nb\nc"), EolStyle::Lf);
        assert_eq!(detect_eol(b"a\r\nb\r\nc\n"), EolStyle::CrLf);
        assert_eq!(detect_eol(b"a\rb\rc"), EolStyle::Cr);
        assert_eq!(detect_eol(b"abc"), EolStyle::Lf);
    }

    #[test]
    fn test_header_always_first() {
        let store = store_with(b"id,name\n1,a\n2,b\n3,c\n");
        assert_eq!(lines(&store, 0, 4, 4), vec!["id,name\n"]);
        assert_eq!(lines(&store, 12, 16, 4), vec!["id,name\n", "2,b\n"]);
    }

    #[test]
    fn test_line_pending_at_end_is_completed() {
        let store = store_with(b"h\nlong line here\nnext\n");
        // range [2, 3) contains only the start of "long line here"
        assert_eq!(lines(&store, 2, 3, 2), vec!["h\n", "long line here\n"]);
        assert_eq!(lines(&store, 3, 22, 2), vec!["h\n", "next\n"]);
    }

    #[test]
    fn test_start_on_line_boundary_keeps_line() {
        let store = store_with(b"h\r\nab\r\ncd\r\n");
        assert_eq!(lines(&store, 7, 11, 3), vec!["h\r\n", "cd\r\n"]);
        assert_eq!(lines(&store, 6, 11, 3), vec!["h\r\n", "cd\r\n"]);
        assert_eq!(lines(&store, 1, 7, 3), vec!["h\r\n", "ab\r\n"]);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let store = store_with(b"h\n1\n");
        assert!(read_range(&store, "f.csv", 4, 8, 2).is_err());
        assert!(read_range(&store, "f.csv", 2, 2, 2).is_err());
        assert!(read_range(&store, "f.csv", 0, 4, 0).is_err());
    }

    #[test]
    fn test_into_rows_parses_range() {
        let store = store_with(b"id,name\n1,a\n2,b\n3,c\n");
        let rows: Vec<_> = read_range(&store, "f.csv", 10, 20, 3)
            .unwrap()
            .into_rows(&RowOptions::default())
            .unwrap()
            .map(|r| r.unwrap().record["id"].clone())
            .collect();
        assert_eq!(rows, vec![serde_json::json!("2"), serde_json::json!("3")]);
    }
}
