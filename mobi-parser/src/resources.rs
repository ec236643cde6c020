use std::io::Read;

use flate2::read::ZlibDecoder;
use tracing::warn;

use crate::error::MobiError;
use crate::reader::ByteReader;

/// Only the leading bytes of an embedded font are obfuscated.
const FONT_OBFUSCATION_LEN: usize = 1040;

/// Decodes one resource record into usable bytes.
///
/// `FONT` records are de-obfuscated and, when flagged, zlib-inflated.
/// `VIDE`/`AUDI` records carry a 12-byte media prefix before the payload.
/// Everything else (covers, thumbnails) is returned as-is.
pub fn decode_resource(record: &[u8]) -> Result<Vec<u8>, MobiError> {
    match record.get(..4) {
        Some(b"FONT") => decode_font(record),
        Some(b"VIDE" | b"AUDI") => Ok(record.get(12..).unwrap_or_default().to_vec()),
        _ => Ok(record.to_vec()),
    }
}

fn decode_font(record: &[u8]) -> Result<Vec<u8>, MobiError> {
    let reader = ByteReader::new(record);
    let flags = reader.u32(8)?;
    let data_start = reader.u32(12)? as usize;
    let key_length = reader.u32(16)? as usize;
    let key_start = reader.u32(20)? as usize;

    let mut data = record
        .get(data_start..)
        .ok_or_else(|| MobiError::header("FONT", "data offset past end of record"))?
        .to_vec();

    if flags & 0b10 != 0 {
        let key = reader.slice(key_start, key_length)?;
        if !key.is_empty() {
            let obfuscated = FONT_OBFUSCATION_LEN.min(data.len());
            for (i, byte) in data.iter_mut().take(obfuscated).enumerate() {
                *byte ^= key[i % key.len()];
            }
        }
    }

    if flags & 0b1 != 0 {
        let mut inflated = Vec::new();
        match ZlibDecoder::new(data.as_slice()).read_to_end(&mut inflated) {
            Ok(_) => return Ok(inflated),
            Err(err) => {
                warn!(error = %err, "embedded font failed to inflate; keeping de-obfuscated bytes");
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn font_record(flags: u32, key: &[u8], payload: &[u8]) -> Vec<u8> {
        let data_start = 24 + key.len();
        let mut record = Vec::new();
        record.extend_from_slice(b"FONT");
        record.extend_from_slice(&0u32.to_be_bytes());
        record.extend_from_slice(&flags.to_be_bytes());
        record.extend_from_slice(&(data_start as u32).to_be_bytes());
        record.extend_from_slice(&(key.len() as u32).to_be_bytes());
        record.extend_from_slice(&24u32.to_be_bytes());
        record.extend_from_slice(key);
        record.extend_from_slice(payload);
        record
    }

    #[test]
    fn test_plain_resources_pass_through() {
        let jpeg = [0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(decode_resource(&jpeg).unwrap(), jpeg);
    }

    #[test]
    fn test_media_records_skip_prefix() {
        let mut record = b"VIDE".to_vec();
        record.extend_from_slice(&[0u8; 8]);
        record.extend_from_slice(b"payload");
        assert_eq!(decode_resource(&record).unwrap(), b"payload");
    }

    #[test]
    fn test_font_deobfuscation_and_inflate() {
        let font_bytes = b"OTTO fake font data with some length to it".to_vec();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&font_bytes).unwrap();
        let compressed = encoder.finish().unwrap();

        let key = [0x5A, 0xA5, 0x3C];
        let mut obfuscated = compressed.clone();
        for (i, byte) in obfuscated
            .iter_mut()
            .take(FONT_OBFUSCATION_LEN)
            .enumerate()
        {
            *byte ^= key[i % key.len()];
        }

        let record = font_record(0b11, &key, &obfuscated);
        assert_eq!(decode_resource(&record).unwrap(), font_bytes);
    }

    #[test]
    fn test_font_inflate_failure_returns_deobfuscated_bytes() {
        // Flag says zlib, payload is not a zlib stream.
        let record = font_record(0b01, &[], b"definitely not zlib");
        assert_eq!(decode_resource(&record).unwrap(), b"definitely not zlib");
    }
}
