//! Gzip and zip handling

use std::io::{Cursor, Read};

use flate2::read::MultiGzDecoder;

use crate::error::FileError;
use crate::storage::ByteStream;

/// Gzip stream together with the original file name from its header
pub struct GzipMember {
    pub inner_name: Option<String>,
    pub reader: MultiGzDecoder<ByteStream>,
}

/// Start decompressing a gzip stream
///
/// The decoder parses the header on creation; the `FNAME` field, when present,
/// is decoded as ISO-8859-1 the way gzip writes it.
pub fn open_gzip(stream: ByteStream) -> GzipMember {
    let reader = MultiGzDecoder::new(stream);
    let inner_name = reader
        .header()
        .and_then(|header| header.filename())
        .map(|raw| raw.iter().map(|b| char::from(*b)).collect::<String>())
        .filter(|name| !name.is_empty());
    GzipMember { inner_name, reader }
}

/// One file inside a zip archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Read every file entry of a zip archive into memory
pub fn read_zip_entries(path: &str, stream: ByteStream) -> Result<Vec<ZipEntry>, FileError> {
    let mut bytes = Vec::new();
    let mut stream = stream;
    stream
        .read_to_end(&mut bytes)
        .map_err(|e| FileError::decode(path, e))?;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| FileError::decode(path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| FileError::decode(path, e))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| FileError::decode(format!("{path}/{name}"), e))?;
        entries.push(ZipEntry { name, data });
    }
    Ok(entries)
}
