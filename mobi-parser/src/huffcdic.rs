use crate::error::MobiError;
use crate::reader::ByteReader;

/// Dictionary entry: raw bytes plus whether they are already fully expanded.
struct DictEntry {
    bytes: Vec<u8>,
    expanded: bool,
}

/// HUFF/CDIC decoder.
///
/// The HUFF record carries two tables: `table1` with 256 entries keyed by
/// the top byte of the 32-bit bit window (`found`, code length, value) and
/// `table2` with per-code-length `(lower_bound, value)` pairs for codes the
/// first table cannot resolve directly. CDIC records carry the phrase
/// dictionary; phrases may themselves be HUFF-coded and are expanded on
/// first use, memoized for subsequent hits.
pub struct HuffCdic {
    table1: [(bool, u32, u32); 256],
    table2: [(u32, u32); 33],
    dictionary: Vec<DictEntry>,
}

impl HuffCdic {
    pub fn new(huff: &[u8], cdics: &[&[u8]]) -> Result<Self, MobiError> {
        let reader = ByteReader::new(huff);
        if reader.magic(0)? != b"HUFF" {
            return Err(MobiError::index("HUFF", "missing HUFF magic"));
        }
        let table1_offset = reader.u32(8)? as usize;
        let table2_offset = reader.u32(12)? as usize;

        let mut table1 = [(false, 0u32, 0u32); 256];
        for (i, entry) in table1.iter_mut().enumerate() {
            let dword = reader.u32(table1_offset + i * 4)?;
            *entry = (dword & 0x80 != 0, dword & 0x1F, dword >> 8);
        }

        let mut table2 = [(0u32, 0u32); 33];
        for code_length in 1..=32usize {
            let base = table2_offset + (code_length - 1) * 8;
            table2[code_length] = (reader.u32(base)?, reader.u32(base + 4)?);
        }

        let mut decoder = Self {
            table1,
            table2,
            dictionary: Vec::new(),
        };
        for cdic in cdics {
            decoder.load_cdic(cdic)?;
        }
        Ok(decoder)
    }

    fn load_cdic(&mut self, cdic: &[u8]) -> Result<(), MobiError> {
        let reader = ByteReader::new(cdic);
        if reader.magic(0)? != b"CDIC" {
            return Err(MobiError::index("CDIC", "missing CDIC magic"));
        }
        if reader.u32(4)? != 16 {
            return Err(MobiError::index("CDIC", "unexpected header length"));
        }
        let total_phrases = reader.u32(8)? as usize;
        let code_bits = reader.u32(12)?;
        if code_bits == 0 || code_bits > 16 {
            return Err(MobiError::index(
                "CDIC",
                format!("implausible phrase code width {code_bits}"),
            ));
        }

        let remaining = total_phrases.saturating_sub(self.dictionary.len());
        let in_this_record = remaining.min(1usize << code_bits);
        for i in 0..in_this_record {
            let offset = reader.u16(16 + 2 * i)? as usize;
            let length_flags = reader.u16(16 + offset)?;
            let length = usize::from(length_flags & 0x7FFF);
            let bytes = reader.slice(18 + offset, length)?.to_vec();
            self.dictionary.push(DictEntry {
                bytes,
                // The high bit marks a phrase stored in plain bytes.
                expanded: length_flags & 0x8000 != 0,
            });
        }
        Ok(())
    }

    pub fn decompress(&mut self, data: &[u8], record: usize) -> Result<Vec<u8>, MobiError> {
        self.decode(data, record, 0)
    }

    fn decode(&mut self, data: &[u8], record: usize, depth: usize) -> Result<Vec<u8>, MobiError> {
        if depth > 16 {
            return Err(MobiError::CorruptText {
                record,
                reason: "dictionary recursion exceeds plausible depth".into(),
            });
        }

        let mut padded = data.to_vec();
        padded.extend_from_slice(&[0u8; 8]);

        let mut bits_left = i64::try_from(data.len() * 8).unwrap_or(i64::MAX);
        let mut pos = 0usize;
        let mut window = read_u64(&padded, pos);
        let mut shift: i64 = 32;
        let mut output = Vec::new();

        while bits_left > 0 {
            if shift <= 0 {
                pos += 4;
                window = read_u64(&padded, pos);
                shift += 32;
            }
            let bits = ((window >> shift) & 0xFFFF_FFFF) as u32;

            let (found, mut code_length, mut value) = self.table1[(bits >> 24) as usize];
            if !found {
                code_length += 1;
                while code_length <= 32 && (bits >> (32 - code_length)) < self.table2[code_length as usize].0 {
                    code_length += 1;
                }
                if code_length > 32 {
                    return Err(MobiError::CorruptText {
                        record,
                        reason: "no code length matches the bit window".into(),
                    });
                }
                value = self.table2[code_length as usize].1;
            }
            if code_length == 0 {
                return Err(MobiError::CorruptText {
                    record,
                    reason: "zero-length code in HUFF table".into(),
                });
            }

            shift -= i64::from(code_length);
            bits_left -= i64::from(code_length);
            if bits_left < 0 {
                break;
            }

            let index = value
                .checked_sub(bits >> (32 - code_length))
                .ok_or_else(|| MobiError::CorruptText {
                    record,
                    reason: "phrase index underflow".into(),
                })? as usize;
            let phrase = self.phrase(index, record, depth)?;
            output.extend_from_slice(&phrase);
        }
        Ok(output)
    }

    /// Returns the expanded bytes for a dictionary phrase, expanding and
    /// memoizing HUFF-coded phrases on first use.
    fn phrase(&mut self, index: usize, record: usize, depth: usize) -> Result<Vec<u8>, MobiError> {
        let entry = self
            .dictionary
            .get(index)
            .ok_or_else(|| MobiError::CorruptText {
                record,
                reason: format!("phrase index {index} outside dictionary"),
            })?;
        if entry.expanded {
            return Ok(entry.bytes.clone());
        }
        let raw = entry.bytes.clone();
        let expanded = self.decode(&raw, record, depth + 1)?;
        self.dictionary[index] = DictEntry {
            bytes: expanded.clone(),
            expanded: true,
        };
        Ok(expanded)
    }
}

fn read_u64(data: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    if let Some(slice) = data.get(pos..pos + 8) {
        bytes.copy_from_slice(slice);
    }
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a HUFF record where each listed byte is an 8-bit code for the
    /// dictionary entry at the same position.
    fn direct_huff(codes: &[u8]) -> Vec<u8> {
        let table1_offset = 24usize;
        let table2_offset = table1_offset + 256 * 4;
        let mut record = vec![0u8; table2_offset + 32 * 8];
        record[0..4].copy_from_slice(b"HUFF");
        record[8..12].copy_from_slice(&(table1_offset as u32).to_be_bytes());
        record[12..16].copy_from_slice(&(table2_offset as u32).to_be_bytes());
        for (index, &code) in codes.iter().enumerate() {
            // found | codelen 8 | value = code + index so that
            // index == value - (bits >> 24).
            let dword = 0x80u32 | 8 | ((u32::from(code) + index as u32) << 8);
            let at = table1_offset + usize::from(code) * 4;
            record[at..at + 4].copy_from_slice(&dword.to_be_bytes());
        }
        record
    }

    fn cdic_with(phrases: &[(&[u8], bool)]) -> Vec<u8> {
        let mut record = vec![0u8; 16];
        record[0..4].copy_from_slice(b"CDIC");
        record[4..8].copy_from_slice(&16u32.to_be_bytes());
        record[8..12].copy_from_slice(&(phrases.len() as u32).to_be_bytes());
        record[12..16].copy_from_slice(&8u32.to_be_bytes());

        let index_len = phrases.len() * 2;
        let mut body: Vec<u8> = Vec::new();
        let mut offsets = Vec::new();
        for (bytes, literal) in phrases {
            offsets.push(index_len + body.len());
            let flags = if *literal { 0x8000u16 } else { 0 } | bytes.len() as u16;
            body.extend_from_slice(&flags.to_be_bytes());
            body.extend_from_slice(bytes);
        }
        for offset in offsets {
            record.extend_from_slice(&(offset as u16).to_be_bytes());
        }
        record.extend_from_slice(&body);
        record
    }

    #[test]
    fn test_decodes_direct_codes() {
        let huff = direct_huff(&[0x00, 0x01]);
        let cdic = cdic_with(&[(b"Hello ", true), (b"world", true)]);
        let mut decoder = HuffCdic::new(&huff, &[&cdic]).unwrap();
        let out = decoder.decompress(&[0x00, 0x01], 1).unwrap();
        assert_eq!(out, b"Hello world");
    }

    #[test]
    fn test_expands_nested_phrases_once() {
        let huff = direct_huff(&[0x00, 0x01, 0x02]);
        // Entry 2 is itself HUFF-coded: it decodes to entries 0 then 1.
        let cdic = cdic_with(&[(b"Hello ", true), (b"world", true), (&[0x00, 0x01], false)]);
        let mut decoder = HuffCdic::new(&huff, &[&cdic]).unwrap();
        assert_eq!(decoder.decompress(&[0x02], 1).unwrap(), b"Hello world");
        // Memoized: second use decodes from the expanded bytes.
        assert_eq!(decoder.decompress(&[0x02], 1).unwrap(), b"Hello world");
    }

    #[test]
    fn test_long_codes_resolve_through_table2() {
        let table1_offset = 24usize;
        let table2_offset = table1_offset + 256 * 4;
        let mut huff = vec![0u8; table2_offset + 32 * 8];
        huff[0..4].copy_from_slice(b"HUFF");
        huff[8..12].copy_from_slice(&(table1_offset as u32).to_be_bytes());
        huff[12..16].copy_from_slice(&(table2_offset as u32).to_be_bytes());
        // Top byte 0xAB: not found, initial code length 8.
        let at = table1_offset + 0xAB * 4;
        huff[at..at + 4].copy_from_slice(&8u32.to_be_bytes());
        // Lengths 9..=11 are unreachable; 12 matches with value == lower bound.
        for code_length in 9..=11usize {
            let base = table2_offset + (code_length - 1) * 8;
            huff[base..base + 4].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        }
        let base = table2_offset + 11 * 8;
        huff[base..base + 4].copy_from_slice(&0xABCu32.to_be_bytes());
        huff[base + 4..base + 8].copy_from_slice(&0xABCu32.to_be_bytes());

        let cdic = cdic_with(&[(b"ok", true)]);
        let mut decoder = HuffCdic::new(&huff, &[&cdic]).unwrap();
        // Two 12-bit 0xABC codes packed into three bytes.
        let out = decoder.decompress(&[0xAB, 0xCA, 0xBC], 1).unwrap();
        assert_eq!(out, b"okok");
    }

    #[test]
    fn test_rejects_out_of_range_phrase() {
        let huff = direct_huff(&[0x00]);
        let cdic = cdic_with(&[]);
        let mut decoder = HuffCdic::new(&huff, &[&cdic]).unwrap();
        assert!(decoder.decompress(&[0x00], 7).is_err());
    }

    #[test]
    fn test_rejects_bad_magics() {
        assert!(HuffCdic::new(b"HUFX\x00\x00\x00\x00", &[]).is_err());
        let huff = direct_huff(&[]);
        assert!(HuffCdic::new(&huff, &[b"CDIX"]).is_err());
    }
}
