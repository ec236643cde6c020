use crate::error::MobiError;
use crate::headers::TextEncoding;
use crate::reader::ByteReader;

/// EXTH record tags consumed by the parser.
///
/// Multi-valued tags may repeat; everything else is first-wins.
pub mod tag {
    pub const CREATOR: u32 = 100;
    pub const PUBLISHER: u32 = 101;
    pub const DESCRIPTION: u32 = 103;
    pub const ISBN: u32 = 104;
    pub const SUBJECT: u32 = 105;
    pub const DATE: u32 = 106;
    pub const CONTRIBUTOR: u32 = 108;
    pub const RIGHTS: u32 = 109;
    pub const SUBJECT_CODE: u32 = 110;
    pub const SOURCE: u32 = 112;
    pub const ASIN: u32 = 113;
    pub const BOUNDARY: u32 = 121;
    pub const FIXED_LAYOUT: u32 = 122;
    pub const NUM_RESOURCES: u32 = 125;
    pub const ORIG_RESOLUTION: u32 = 126;
    pub const COVER_OFFSET: u32 = 201;
    pub const THUMBNAIL_OFFSET: u32 = 202;
    pub const TITLE: u32 = 503;
    pub const LANGUAGE: u32 = 524;
    pub const PAGE_PROGRESSION: u32 = 527;
}

/// The parsed EXTH block: an ordered list of `(tag, payload)` records.
#[derive(Debug, Default)]
pub struct ExthBlock {
    records: Vec<(u32, Vec<u8>)>,
}

impl ExthBlock {
    /// Parses the EXTH block that starts at `record0[offset..]`.
    pub fn parse(record0: &[u8], offset: usize) -> Result<Self, MobiError> {
        let reader = ByteReader::new(record0);
        if reader.magic(offset).map_err(|_| {
            MobiError::MalformedExth("block starts past the end of record 0".into())
        })? != b"EXTH"
        {
            return Err(MobiError::MalformedExth("missing EXTH magic".into()));
        }

        let count = reader
            .u32(offset + 8)
            .map_err(|_| MobiError::MalformedExth("truncated record count".into()))?;

        let mut records = Vec::with_capacity(count as usize);
        let mut cursor = offset + 12;
        for i in 0..count {
            let record_type = reader
                .u32(cursor)
                .map_err(|_| MobiError::MalformedExth(format!("truncated record {i}")))?;
            let record_length = reader
                .u32(cursor + 4)
                .map_err(|_| MobiError::MalformedExth(format!("truncated record {i}")))?
                as usize;
            if record_length < 8 {
                return Err(MobiError::MalformedExth(format!(
                    "record {i} declares impossible length {record_length}"
                )));
            }
            let payload = reader
                .slice(cursor + 8, record_length - 8)
                .map_err(|_| MobiError::MalformedExth(format!("record {i} payload truncated")))?;
            records.push((record_type, payload.to_vec()));
            cursor += record_length;
        }

        Ok(Self { records })
    }

    pub fn first(&self, tag: u32) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|(record_tag, _)| *record_tag == tag)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn all(&self, tag: u32) -> impl Iterator<Item = &[u8]> {
        self.records
            .iter()
            .filter(move |(record_tag, _)| *record_tag == tag)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn string(&self, tag: u32, encoding: TextEncoding) -> Option<String> {
        self.first(tag).map(|payload| encoding.decode(payload))
    }

    pub fn strings(&self, tag: u32, encoding: TextEncoding) -> Vec<String> {
        self.all(tag)
            .map(|payload| encoding.decode(payload))
            .filter(|value| !value.trim().is_empty())
            .collect()
    }

    /// Numeric records are stored as 4-byte big-endian values.
    pub fn u32_value(&self, tag: u32) -> Option<u32> {
        self.first(tag).and_then(|payload| {
            let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
            Some(u32::from_be_bytes(bytes))
        })
    }

    /// The KF8 boundary record index (EXTH 121), when one is declared.
    pub fn boundary(&self) -> Option<u32> {
        self.u32_value(tag::BOUNDARY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_exth(records: &[(u32, &[u8])]) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(b"EXTH");
        let total: usize = 12 + records.iter().map(|(_, d)| d.len() + 8).sum::<usize>();
        block.extend_from_slice(&(total as u32).to_be_bytes());
        block.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for (tag, data) in records {
            block.extend_from_slice(&tag.to_be_bytes());
            block.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
            block.extend_from_slice(data);
        }
        block
    }

    #[test]
    fn test_parses_string_and_numeric_records() {
        let block = build_exth(&[
            (tag::CREATOR, b"Kehlmann, Daniel"),
            (tag::ISBN, b"9783446274860"),
            (tag::COVER_OFFSET, &5u32.to_be_bytes()),
        ]);
        let exth = ExthBlock::parse(&block, 0).unwrap();
        assert_eq!(
            exth.string(tag::CREATOR, TextEncoding::Utf8).as_deref(),
            Some("Kehlmann, Daniel")
        );
        assert_eq!(
            exth.string(tag::ISBN, TextEncoding::Utf8).as_deref(),
            Some("9783446274860")
        );
        assert_eq!(exth.u32_value(tag::COVER_OFFSET), Some(5));
        assert_eq!(exth.u32_value(tag::THUMBNAIL_OFFSET), None);
    }

    #[test]
    fn test_multi_valued_records_accumulate() {
        let block = build_exth(&[
            (tag::SUBJECT, b"Fiction"),
            (tag::SUBJECT, b"History"),
            (tag::SUBJECT, b"  "),
        ]);
        let exth = ExthBlock::parse(&block, 0).unwrap();
        assert_eq!(
            exth.strings(tag::SUBJECT, TextEncoding::Utf8),
            vec!["Fiction".to_string(), "History".to_string()]
        );
    }

    #[test]
    fn test_rejects_bad_magic_and_lengths() {
        assert!(matches!(
            ExthBlock::parse(b"EXTXxxxxxxxx", 0),
            Err(MobiError::MalformedExth(_))
        ));

        let mut block = build_exth(&[(tag::TITLE, b"t")]);
        // Corrupt the record length to an impossible value.
        let len_pos = 12 + 4;
        block[len_pos..len_pos + 4].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            ExthBlock::parse(&block, 0),
            Err(MobiError::MalformedExth(_))
        ));
    }
}
