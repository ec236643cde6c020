use crate::error::MobiError;
use crate::reader::ByteReader;

/// Byte offset of the type/creator fingerprint inside the PDB header.
const TYPE_OFFSET: usize = 60;
const CREATOR_OFFSET: usize = 64;
const NUM_RECORDS_OFFSET: usize = 76;
const HEADER_LEN: usize = 78;
const RECORD_INFO_LEN: usize = 8;

/// The Palm Database envelope every MOBI file is wrapped in.
///
/// Only the pieces the parser consumes are retained: database name, the
/// type/creator fingerprint and the record offset table. Record `i` spans
/// `[offset_i, offset_{i+1})`; the last record runs to the end of the file.
pub struct PdbDatabase {
    data: Vec<u8>,
    name: String,
    type_code: [u8; 4],
    creator_code: [u8; 4],
    offsets: Vec<usize>,
}

impl PdbDatabase {
    pub fn parse(data: Vec<u8>) -> Result<Self, MobiError> {
        let reader = ByteReader::new(&data);
        let name_bytes = reader.slice(0, 32)?;
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let mut type_code = [0u8; 4];
        type_code.copy_from_slice(reader.slice(TYPE_OFFSET, 4)?);
        let mut creator_code = [0u8; 4];
        creator_code.copy_from_slice(reader.slice(CREATOR_OFFSET, 4)?);

        let num_records = usize::from(reader.u16(NUM_RECORDS_OFFSET)?);
        if num_records == 0 {
            return Err(MobiError::header("PDB", "container holds no records"));
        }

        let mut offsets = Vec::with_capacity(num_records);
        for i in 0..num_records {
            let entry = HEADER_LEN + i * RECORD_INFO_LEN;
            let offset = reader.u32(entry)? as usize;
            if offset > data.len() {
                return Err(MobiError::header(
                    "PDB",
                    format!("record {i} starts past the end of the file"),
                ));
            }
            if let Some(&previous) = offsets.last() {
                if offset < previous {
                    return Err(MobiError::header(
                        "PDB",
                        format!("record {i} offsets are not monotonic"),
                    ));
                }
            }
            offsets.push(offset);
        }

        Ok(Self {
            data,
            name,
            type_code,
            creator_code,
            offsets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_code(&self) -> &[u8; 4] {
        &self.type_code
    }

    pub fn creator_code(&self) -> &[u8; 4] {
        &self.creator_code
    }

    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    /// Slice of record `index`, bounded by the next record's start offset.
    pub fn record(&self, index: usize) -> Result<&[u8], MobiError> {
        let start = *self
            .offsets
            .get(index)
            .ok_or(MobiError::MissingRecord(index))?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.data.len());
        self.data
            .get(start..end)
            .ok_or(MobiError::MissingRecord(index))
    }
}

/// Returns true when the bytes carry the `BOOKMOBI` fingerprint at offset 60.
pub fn is_mobi(data: &[u8]) -> bool {
    data.get(TYPE_OFFSET..TYPE_OFFSET + 8)
        .is_some_and(|fingerprint| fingerprint == b"BOOKMOBI")
}
