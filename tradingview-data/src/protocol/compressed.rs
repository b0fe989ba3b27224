use crate::error::Error;
use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::read::DeflateDecoder;
use serde_json::Value;
use std::io::Read;

const END_OF_CENTRAL_DIRECTORY: u32 = 0x0605_4b50;
const CENTRAL_DIRECTORY_ENTRY: u32 = 0x0201_4b50;
const LOCAL_FILE_HEADER: u32 = 0x0403_4b50;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Upper bound on an inflated entry. Header sizes are only used as a capped hint.
pub const MAX_INFLATED_BYTES: usize = 64 * 1024 * 1024;
const CAPACITY_HINT_LIMIT: usize = 1024 * 1024;

/// Decode a `dataCompressed` study payload: base64 text wrapping a ZIP archive whose first
/// entry is a UTF-8 JSON document.
pub fn decode(encoded: &str) -> Result<Value, Error> {
    let archive = STANDARD
        .decode(encoded.trim())
        .map_err(|error| Error::Compressed(format!("invalid base64: {error}")))?;

    let contents = first_entry(&archive)?;

    serde_json::from_slice(&contents)
        .map_err(|error| Error::Compressed(format!("invalid JSON document: {error}")))
}

/// Extract the first entry listed in the archive's central directory.
fn first_entry(archive: &[u8]) -> Result<Vec<u8>, Error> {
    let eocd = find_end_of_central_directory(archive)?;

    let entries = read_u16(archive, eocd + 10)?;
    if entries == 0 {
        return Err(Error::Compressed("archive contains no entries".to_string()));
    }

    let central = read_u32(archive, eocd + 16)? as usize;
    if read_u32(archive, central)? != CENTRAL_DIRECTORY_ENTRY {
        return Err(Error::Compressed("corrupt central directory".to_string()));
    }

    let method = read_u16(archive, central + 10)?;
    let compressed_size = read_u32(archive, central + 20)? as usize;
    let uncompressed_size = read_u32(archive, central + 24)? as usize;
    let local = read_u32(archive, central + 42)? as usize;

    if read_u32(archive, local)? != LOCAL_FILE_HEADER {
        return Err(Error::Compressed("corrupt local file header".to_string()));
    }

    let name_len = read_u16(archive, local + 26)? as usize;
    let extra_len = read_u16(archive, local + 28)? as usize;
    let data_start = local + 30 + name_len + extra_len;
    let data = archive
        .get(data_start..data_start + compressed_size)
        .ok_or_else(|| Error::Compressed("entry data out of bounds".to_string()))?;

    match method {
        METHOD_STORED => Ok(data.to_vec()),
        METHOD_DEFLATED => {
            let mut contents = Vec::with_capacity(uncompressed_size.min(CAPACITY_HINT_LIMIT));
            DeflateDecoder::new(data)
                .take(MAX_INFLATED_BYTES as u64 + 1)
                .read_to_end(&mut contents)
                .map_err(|error| Error::Compressed(format!("inflate failed: {error}")))?;

            if contents.len() > MAX_INFLATED_BYTES {
                return Err(Error::Compressed(format!(
                    "entry inflates past {MAX_INFLATED_BYTES} bytes"
                )));
            }
            Ok(contents)
        }
        other => Err(Error::Compressed(format!(
            "unsupported compression method: {other}"
        ))),
    }
}

fn find_end_of_central_directory(archive: &[u8]) -> Result<usize, Error> {
    if archive.len() < 22 {
        return Err(Error::Compressed("archive too short".to_string()));
    }

    // Record is 22 bytes plus a trailing comment of at most u16::MAX bytes
    let lowest = archive.len().saturating_sub(22 + u16::MAX as usize);
    (lowest..=archive.len() - 22)
        .rev()
        .find(|&offset| read_u32(archive, offset).ok() == Some(END_OF_CENTRAL_DIRECTORY))
        .ok_or_else(|| Error::Compressed("not a zip archive".to_string()))
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, Error> {
    bytes
        .get(offset..offset + 2)
        .map(|slice| u16::from_le_bytes([slice[0], slice[1]]))
        .ok_or_else(|| Error::Compressed("unexpected end of archive".to_string()))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    bytes
        .get(offset..offset + 4)
        .map(|slice| u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
        .ok_or_else(|| Error::Compressed("unexpected end of archive".to_string()))
}
