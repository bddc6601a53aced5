//! Delimiter and quote character detection

use std::collections::HashMap;

use csv::ReaderBuilder;

/// Delimiters tried during detection, in preference order
pub const DELIMITER_CANDIDATES: [u8; 6] = [b',', b';', b'|', b'^', b'\t', b' '];

/// Quote characters tried during detection, in preference order
pub const QUOTE_CANDIDATES: [u8; 2] = [b'"', b'\''];

/// Lines of a sample considered during detection
pub const MAX_DIALECT_LINES: usize = 50;

/// Detected CSV dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

/// How well a dialect splits the sample into a rectangular table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    /// Rows with the most common field count
    consistent_rows: usize,
    /// That field count
    width: usize,
}

fn score(sample: &str, delimiter: u8, quote: u8) -> Option<Score> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .quote(quote)
        .from_reader(sample.as_bytes());

    let mut widths: HashMap<usize, usize> = HashMap::new();
    for record in reader.records().take(MAX_DIALECT_LINES) {
        let record = record.ok()?;
        *widths.entry(record.len()).or_insert(0) += 1;
    }

    widths
        .into_iter()
        .filter(|(width, _)| *width > 1)
        .map(|(width, consistent_rows)| Score {
            consistent_rows,
            width,
        })
        .max()
}

/// Detect the dialect of a text sample
///
/// Fixed values (`Some`) are kept as given; only the missing ones are
/// detected. Falls back to `,` and `"` when no candidate splits the sample
/// into more than one column.
pub fn sniff_dialect(sample: &str, delimiter: Option<u8>, quote: Option<u8>) -> Dialect {
    let fallback = Dialect::default();
    let delimiters: Vec<u8> = delimiter.map(|d| vec![d]).unwrap_or_else(|| DELIMITER_CANDIDATES.to_vec());
    let quotes: Vec<u8> = quote.map(|q| vec![q]).unwrap_or_else(|| QUOTE_CANDIDATES.to_vec());

    let mut best: Option<(Score, Dialect)> = None;
    for d in &delimiters {
        for q in &quotes {
            let Some(candidate) = score(sample, *d, *q) else {
                continue;
            };
            // strictly better only, so earlier candidates win ties
            if best.is_none_or(|(current, _)| candidate > current) {
                best = Some((
                    candidate,
                    Dialect {
                        delimiter: *d,
                        quote: *q,
                    },
                ));
            }
        }
    }

    match best {
        Some((_, dialect)) => dialect,
        None => Dialect {
            delimiter: delimiter.unwrap_or(fallback.delimiter),
            quote: quote.unwrap_or(fallback.quote),
        },
    }
}
