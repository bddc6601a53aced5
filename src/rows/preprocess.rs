//! Line-level preprocessing ahead of the CSV parser
//!
//! [`LinePreprocessor`] wraps a raw byte stream and hands the parser clean UTF-8:
//! text is decoded from the configured encoding, NUL bytes are removed, the
//! configured number of leading lines is dropped together with any empty lines
//! before the first content line, and the configured number of trailing lines
//! is withheld. Empty lines between records are dropped too (or, with
//! `keep_empty_rows`, replaced by a row holding one empty field), and
//! [`LinePreprocessor::physical_line`] maps parser line numbers back to the
//! source file.
//!
//! Line terminators (`\n`, `\r\n`, `\r`) are normalized to `\n` so the parser's
//! line counter also advances on CR-only files.

use std::collections::VecDeque;
use std::io::{self, Read};

use encoding_rs::{Decoder, Encoding, UTF_8};

const CHUNK_SIZE: usize = 64 * 1024;

/// Placeholder emitted for retained empty lines; parses as one empty field
pub(crate) const EMPTY_ROW_PLACEHOLDER: &str = "\"\"";

/// Settings for [`LinePreprocessor`]
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub encoding: &'static Encoding,
    pub skip_header_row: usize,
    pub skip_footer_row: usize,
    pub keep_empty_rows: bool,
    pub quote: u8,
    /// Escapes the next byte inside a quoted field
    pub escape: Option<u8>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            skip_header_row: 0,
            skip_footer_row: 0,
            keep_empty_rows: false,
            quote: b'"',
            escape: Some(b'\\'),
        }
    }
}

/// Decoding, line splitting `Read` adapter
pub struct LinePreprocessor<R> {
    inner: R,
    options: PreprocessOptions,
    /// Present for every encoding except strict UTF-8
    decoder: Option<Decoder>,
    raw: Vec<u8>,
    text: String,
    input_done: bool,
    header_lines_left: usize,
    dropped_lines: u64,
    started: bool,
    first_line: bool,
    in_quotes: bool,
    emitted_lines: u64,
    blank_lines: u64,
    /// `(first emitted line affected, blank lines dropped so far)`
    gaps: Vec<(u64, u64)>,
    footer: VecDeque<String>,
    out: Vec<u8>,
    out_pos: usize,
}

impl<R: Read> LinePreprocessor<R> {
    pub fn new(inner: R, options: PreprocessOptions) -> Self {
        let decoder = if options.encoding == UTF_8 {
            None
        } else {
            Some(options.encoding.new_decoder_with_bom_removal())
        };
        Self {
            inner,
            options,
            decoder,
            raw: Vec::new(),
            text: String::new(),
            input_done: false,
            header_lines_left: options.skip_header_row,
            dropped_lines: 0,
            started: false,
            first_line: true,
            in_quotes: false,
            emitted_lines: 0,
            blank_lines: 0,
            gaps: Vec::new(),
            footer: VecDeque::with_capacity(options.skip_footer_row + 1),
            out: Vec::new(),
            out_pos: 0,
        }
    }

    /// Physical lines dropped before the first emitted line
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    /// Map a 1-based line of the emitted stream back to its line in the source
    pub fn physical_line(&self, line: u64) -> u64 {
        let idx = self.gaps.partition_point(|(start, _)| *start <= line);
        let blanks = if idx == 0 { 0 } else { self.gaps[idx - 1].1 };
        line + self.dropped_lines + blanks
    }

    /// Pull raw bytes and decode them into `text`
    fn decode_more(&mut self) -> io::Result<()> {
        if self.input_done {
            return Ok(());
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        let last = n == 0;
        if last {
            self.input_done = true;
        }

        match &mut self.decoder {
            Some(decoder) => {
                let mut src = &chunk[..n];
                loop {
                    let needed = decoder
                        .max_utf8_buffer_length(src.len())
                        .unwrap_or(src.len() * 3 + 16);
                    self.text.reserve(needed);
                    let (result, read, _) = decoder.decode_to_string(src, &mut self.text, last);
                    src = &src[read..];
                    if matches!(result, encoding_rs::CoderResult::InputEmpty) {
                        break;
                    }
                }
            }
            None => {
                self.raw.extend_from_slice(&chunk[..n]);
                let valid = match std::str::from_utf8(&self.raw) {
                    Ok(valid) => valid.len(),
                    Err(e) => match e.error_len() {
                        Some(_) => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("invalid UTF-8 sequence: {e}"),
                            ));
                        }
                        None if last => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "stream ends inside a UTF-8 sequence",
                            ));
                        }
                        None => e.valid_up_to(),
                    },
                };
                let rest = self.raw.split_off(valid);
                let decoded = String::from_utf8(std::mem::replace(&mut self.raw, rest))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.text.push_str(&decoded);
            }
        }
        Ok(())
    }

    /// Next physical line, split as `(content, had_terminator)`
    fn next_line(&mut self) -> io::Result<Option<(String, bool)>> {
        loop {
            if let Some(idx) = self.text.find(['\n', '\r']) {
                let is_cr = self.text.as_bytes()[idx] == b'\r';
                if is_cr && idx + 1 == self.text.len() && !self.input_done {
                    // a CR at the buffer end may be the first half of CRLF
                    self.decode_more()?;
                    continue;
                }
                let term_len = if is_cr && self.text.as_bytes().get(idx + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                let rest = self.text.split_off(idx + term_len);
                let mut line = std::mem::replace(&mut self.text, rest);
                line.truncate(idx);
                return Ok(Some((self.clean(line), true)));
            }
            if self.input_done {
                if self.text.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.text);
                return Ok(Some((self.clean(line), false)));
            }
            self.decode_more()?;
        }
    }

    fn clean(&mut self, mut line: String) -> String {
        if self.first_line {
            self.first_line = false;
            if let Some(stripped) = line.strip_prefix('\u{feff}') {
                line = stripped.to_string();
            }
        }
        if line.contains('\0') {
            line.retain(|c| c != '\0');
        }
        line
    }

    /// Produce the next chunk of output into `out`; returns false when exhausted
    fn fill(&mut self) -> io::Result<bool> {
        self.out.clear();
        self.out_pos = 0;

        while let Some((line, terminated)) = self.next_line()? {
            if self.header_lines_left > 0 {
                self.header_lines_left -= 1;
                self.dropped_lines += 1;
                continue;
            }
            if !self.started {
                if line.is_empty() {
                    self.dropped_lines += 1;
                    continue;
                }
                self.started = true;
            }

            let mut line = line;
            if terminated {
                line.push('\n');
            }
            self.footer.push_back(line);
            if self.footer.len() > self.options.skip_footer_row {
                if let Some(ready) = self.footer.pop_front() {
                    if self.emit(ready) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Queue one line for output; returns false when the line was dropped
    fn emit(&mut self, line: String) -> bool {
        let content = line.strip_suffix('\n').unwrap_or(&line);
        if content.is_empty() && !self.in_quotes {
            if !self.options.keep_empty_rows {
                self.blank_lines += 1;
                self.gaps.push((self.emitted_lines + 1, self.blank_lines));
                return false;
            }
            self.out.extend_from_slice(EMPTY_ROW_PLACEHOLDER.as_bytes());
            self.out.push(b'\n');
            self.emitted_lines += 1;
            return true;
        }
        self.track_quotes(content.as_bytes());
        self.out.extend_from_slice(line.as_bytes());
        self.emitted_lines += 1;
        true
    }

    /// Follow quoted-field state across a line, honouring the escape byte
    fn track_quotes(&mut self, content: &[u8]) {
        let quote = self.options.quote;
        let escape = self.options.escape.filter(|escape| *escape != quote);
        let mut escaped = false;
        for &byte in content {
            if escaped {
                escaped = false;
            } else if self.in_quotes && Some(byte) == escape {
                escaped = true;
            } else if byte == quote {
                self.in_quotes = !self.in_quotes;
            }
        }
    }
}

impl<R: Read> Read for LinePreprocessor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out_pos >= self.out.len() && !self.fill()? {
            return Ok(0);
        }
        let available = &self.out[self.out_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8], options: PreprocessOptions) -> (String, u64) {
        let mut pre = LinePreprocessor::new(input, options);
        let mut out = String::new();
        pre.read_to_string(&mut out).unwrap();
        (out, pre.dropped_lines())
    }

    #[test]
    fn test_skips_leading_and_trailing_lines() {
        let options = PreprocessOptions {
            skip_header_row: 2,
            skip_footer_row: 1,
            ..PreprocessOptions::default()
        };
        let (out, dropped) = run(b"title\n\n\na,b\n1,2\ntotal\n", options);
        assert_eq!(out, "a,b\n1,2\n");
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_blank_lines_map_back_to_source_lines() {
        let mut pre = LinePreprocessor::new(&b"\nh\n1\n\n\n2\n\n3\n"[..], PreprocessOptions::default());
        let mut out = String::new();
        pre.read_to_string(&mut out).unwrap();
        assert_eq!(out, "h\n1\n2\n3\n");
        assert_eq!(pre.physical_line(1), 2);
        assert_eq!(pre.physical_line(2), 3);
        assert_eq!(pre.physical_line(3), 6);
        assert_eq!(pre.physical_line(4), 8);
    }

    #[test]
    fn test_strips_nul_and_normalizes_cr() {
        let (out, _) = run(b"a,b\r1,\x002\r\n3,4", PreprocessOptions::default());
        assert_eq!(out, "a,b\n1,2\n3,4");
    }

    #[test]
    fn test_keeps_empty_rows_outside_quotes() {
        let options = PreprocessOptions {
            keep_empty_rows: true,
            ..PreprocessOptions::default()
        };
        let (out, _) = run(b"a\n\"x\n\ny\"\n\nz\n", options);
        assert_eq!(out, "a\n\"x\n\ny\"\n\"\"\nz\n");
    }

    #[test]
    fn test_escaped_quote_does_not_open_field() {
        let options = PreprocessOptions {
            keep_empty_rows: true,
            ..PreprocessOptions::default()
        };
        let (out, _) = run(b"a,b\n1,\"x\\\"y\"\n\n2,z\n", options);
        assert_eq!(out, "a,b\n1,\"x\\\"y\"\n\"\"\n2,z\n");
    }

    #[test]
    fn test_decodes_latin1() {
        let options = PreprocessOptions {
            encoding: encoding_rs::WINDOWS_1252,
            ..PreprocessOptions::default()
        };
        let (out, _) = run(b"name\nJos\xe9\n", options);
        assert_eq!(out, "name\nJos\u{e9}\n");
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut pre = LinePreprocessor::new(&b"a\n\xff\xfe\n"[..], PreprocessOptions::default());
        let mut out = String::new();
        let err = pre.read_to_string(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
