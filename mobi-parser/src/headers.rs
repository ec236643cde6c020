use crate::error::MobiError;
use crate::reader::ByteReader;

/// Sentinel for "no record" in u32 index fields.
pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// PalmDOC compression identifiers found in the first text header.
pub const COMPRESSION_NONE: u16 = 1;
pub const COMPRESSION_PALMDOC: u16 = 2;
pub const COMPRESSION_HUFFCDIC: u16 = 17480;

/// Character encoding of text records and EXTH strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Windows1252,
    Utf8,
}

impl TextEncoding {
    fn from_code(code: u32) -> Self {
        match code {
            1252 => Self::Windows1252,
            _ => Self::Utf8,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Windows1252 => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// The 16-byte PalmDOC header at the start of record 0.
#[derive(Debug, Clone, Copy)]
pub struct PalmDocHeader {
    pub compression: u16,
    pub text_length: u32,
    pub num_text_records: u16,
    pub record_size: u16,
    pub encryption: u16,
}

impl PalmDocHeader {
    fn parse(reader: &ByteReader<'_>) -> Result<Self, MobiError> {
        Ok(Self {
            compression: reader.u16(0)?,
            text_length: reader.u32(4)?,
            num_text_records: reader.u16(8)?,
            record_size: reader.u16(10)?,
            encryption: reader.u16(12)?,
        })
    }
}

/// The MOBI header that follows the PalmDOC header in record 0.
///
/// Offsets are relative to the start of record 0. Fields that lie beyond
/// `header_length` read as `NULL_INDEX`; old headers are short.
#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub header_length: u32,
    pub mobi_type: u32,
    pub encoding: TextEncoding,
    pub uid: u32,
    pub version: u32,
    pub first_non_book_index: u32,
    pub full_name_offset: u32,
    pub full_name_length: u32,
    pub locale_language: u8,
    pub locale_region: u8,
    pub resource_start: u32,
    pub huff_record: u32,
    pub huff_count: u32,
    pub exth_flags: u32,
    pub extra_data_flags: u16,
    pub indx_record: u32,
}

impl MobiHeader {
    fn parse(reader: &ByteReader<'_>) -> Result<Self, MobiError> {
        if reader.magic(16)? != b"MOBI" {
            return Err(MobiError::header("MOBI", "missing MOBI magic in record 0"));
        }
        let header_length = reader.u32(20)?;
        let locale = reader.u32(92)?;

        // The extra-data flag field only exists in long (v5+) headers.
        let extra_data_flags = if header_length >= 0xE4 {
            reader.u16(0xF2).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            header_length,
            mobi_type: reader.u32(24)?,
            encoding: TextEncoding::from_code(reader.u32(28)?),
            uid: reader.u32(32)?,
            version: reader.u32(36)?,
            first_non_book_index: reader.u32_or(80, NULL_INDEX),
            full_name_offset: reader.u32_or(84, 0),
            full_name_length: reader.u32_or(88, 0),
            locale_language: (locale & 0xFF) as u8,
            locale_region: ((locale >> 8) & 0xFF) as u8,
            resource_start: reader.u32_or(108, NULL_INDEX),
            huff_record: reader.u32_or(112, NULL_INDEX),
            huff_count: reader.u32_or(116, 0),
            exth_flags: reader.u32_or(128, 0),
            extra_data_flags,
            indx_record: reader.u32_or(0xF4, NULL_INDEX),
        })
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }
}

/// KF8-only index pointers, present when the active header has version >= 8.
#[derive(Debug, Clone, Copy)]
pub struct Kf8Header {
    pub fdst_record: u32,
    pub fdst_count: u32,
    pub frag_index: u32,
    pub skel_index: u32,
    pub guide_index: u32,
}

impl Kf8Header {
    fn parse(reader: &ByteReader<'_>) -> Self {
        Self {
            fdst_record: reader.u32_or(0xC0, NULL_INDEX),
            fdst_count: reader.u32_or(0xC4, 0),
            frag_index: reader.u32_or(0xF8, NULL_INDEX),
            skel_index: reader.u32_or(0xFC, NULL_INDEX),
            guide_index: reader.u32_or(0x104, NULL_INDEX),
        }
    }
}

/// All headers parsed out of one record 0.
pub struct Record0 {
    pub palmdoc: PalmDocHeader,
    pub mobi: MobiHeader,
    pub kf8: Option<Kf8Header>,
    /// Title slice `record0[full_name_offset..][..full_name_length]`.
    pub full_name: Option<String>,
}

impl Record0 {
    pub fn parse(record0: &[u8]) -> Result<Self, MobiError> {
        let reader = ByteReader::new(record0);
        let palmdoc = PalmDocHeader::parse(&reader)?;
        let mobi = MobiHeader::parse(&reader)?;

        if palmdoc.encryption != 0 {
            return Err(MobiError::Encrypted(palmdoc.encryption));
        }

        let kf8 = (mobi.version >= 8).then(|| Kf8Header::parse(&reader));

        let full_name = (mobi.full_name_length > 0)
            .then(|| {
                reader
                    .slice(mobi.full_name_offset as usize, mobi.full_name_length as usize)
                    .ok()
                    .map(|bytes| mobi.encoding.decode(bytes))
            })
            .flatten();

        Ok(Self {
            palmdoc,
            mobi,
            kf8,
            full_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record0_with(version: u32, encoding: u32) -> Vec<u8> {
        let mut data = vec![0u8; 0x110];
        data[0..2].copy_from_slice(&COMPRESSION_NONE.to_be_bytes());
        data[16..20].copy_from_slice(b"MOBI");
        data[20..24].copy_from_slice(&0xF8u32.to_be_bytes());
        data[28..32].copy_from_slice(&encoding.to_be_bytes());
        data[36..40].copy_from_slice(&version.to_be_bytes());
        data[92..96].copy_from_slice(&0x0000_0809u32.to_be_bytes());
        data
    }

    #[test]
    fn test_parses_locale_bytes() {
        let record0 = record0_with(6, 65001);
        let parsed = Record0::parse(&record0).unwrap();
        assert_eq!(parsed.mobi.locale_language, 0x09);
        assert_eq!(parsed.mobi.locale_region, 0x08);
        assert_eq!(parsed.mobi.encoding, TextEncoding::Utf8);
        assert!(parsed.kf8.is_none());
    }

    #[test]
    fn test_kf8_header_present_from_version_8() {
        let record0 = record0_with(8, 1252);
        let parsed = Record0::parse(&record0).unwrap();
        assert_eq!(parsed.mobi.encoding, TextEncoding::Windows1252);
        assert!(parsed.kf8.is_some());
    }

    #[test]
    fn test_missing_magic_is_rejected() {
        let mut record0 = record0_with(6, 65001);
        record0[16..20].copy_from_slice(b"BOOK");
        assert!(matches!(
            Record0::parse(&record0),
            Err(MobiError::MalformedHeader { section: "MOBI", .. })
        ));
    }

    #[test]
    fn test_encrypted_records_are_rejected() {
        let mut record0 = record0_with(6, 65001);
        record0[12..14].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(Record0::parse(&record0), Err(MobiError::Encrypted(2))));
    }

    #[test]
    fn test_windows_1252_decoding() {
        // 0x93/0x94 are curly quotes in cp1252.
        assert_eq!(
            TextEncoding::Windows1252.decode(&[0x93, 0x41, 0x94]),
            "\u{201C}A\u{201D}"
        );
    }
}
