//! Builders that assemble synthetic MOBI containers for tests.
//!
//! Exposed behind the `test-utils` feature so downstream crates can feed the
//! ingestion path real `BOOKMOBI` bytes without shipping fixture files.

use crate::exth::tag;
use crate::headers::{COMPRESSION_PALMDOC, NULL_INDEX};
use crate::palmdoc;

const PDB_HEADER_LEN: usize = 78;
const RECORD_INFO_LEN: usize = 8;
const MOBI_HEADER_LEN: u32 = 0xF8;
const TEXT_RECORD_SIZE: usize = 4096;

/// Wraps raw records into a Palm Database with the `BOOKMOBI` fingerprint.
pub fn build_pdb(records: &[&[u8]]) -> Vec<u8> {
    let mut data = vec![0u8; PDB_HEADER_LEN + records.len() * RECORD_INFO_LEN];
    data[..4].copy_from_slice(b"book");
    data[60..64].copy_from_slice(b"BOOK");
    data[64..68].copy_from_slice(b"MOBI");
    data[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());

    let mut offset = data.len();
    for (i, record) in records.iter().enumerate() {
        let entry = PDB_HEADER_LEN + i * RECORD_INFO_LEN;
        data[entry..entry + 4].copy_from_slice(&(offset as u32).to_be_bytes());
        offset += record.len();
    }
    for record in records {
        data.extend_from_slice(record);
    }
    data
}

/// Appends a forward varint: seven bits per byte, high bit on the last byte.
pub fn write_var_len(out: &mut Vec<u8>, value: u32) {
    let mut groups = Vec::new();
    let mut remaining = value;
    loop {
        groups.push((remaining & 0x7F) as u8);
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for (i, group) in groups.into_iter().enumerate() {
        out.push(if i == last { group | 0x80 } else { group });
    }
}

/// Builds INDX record sets with the tag table the KF8 skeleton and fragment
/// indices use: tag 1 (count), 2 (selector), 4 (file number), 6 (geometry).
pub struct IndexBuilder {
    entries: Vec<(String, Vec<(u8, Vec<u32>)>)>,
    cncx: Vec<String>,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBuilder {
    const TAGS: [(u8, u8, u8, u8); 5] = [
        (1, 1, 0x01, 0),
        (2, 1, 0x02, 0),
        (4, 1, 0x04, 0),
        (6, 2, 0x08, 0),
        (0, 0, 0, 1),
    ];

    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cncx: Vec::new(),
        }
    }

    pub fn entry(mut self, name: &str, tags: &[(u8, Vec<u32>)]) -> Self {
        self.entries.push((name.to_string(), tags.to_vec()));
        self
    }

    pub fn cncx(mut self, strings: &[&str]) -> Self {
        self.cncx = strings.iter().map(ToString::to_string).collect();
        self
    }

    /// Produces `[header record, entry record, cncx record?]`.
    pub fn build(self) -> Vec<Vec<u8>> {
        let header_len = 192usize;

        let mut tagx = Vec::new();
        tagx.extend_from_slice(b"TAGX");
        tagx.extend_from_slice(&((12 + Self::TAGS.len() * 4) as u32).to_be_bytes());
        tagx.extend_from_slice(&1u32.to_be_bytes());
        for (tag, num_values, mask, end) in Self::TAGS {
            tagx.extend_from_slice(&[tag, num_values, mask, end]);
        }

        let mut header = vec![0u8; header_len];
        header[..4].copy_from_slice(b"INDX");
        header[4..8].copy_from_slice(&(header_len as u32).to_be_bytes());
        header[24..28].copy_from_slice(&1u32.to_be_bytes());
        header[52..56].copy_from_slice(&(u32::from(!self.cncx.is_empty())).to_be_bytes());
        header.extend_from_slice(&tagx);

        let mut body = Vec::new();
        let mut entry_offsets = Vec::new();
        for (name, tags) in &self.entries {
            entry_offsets.push((header_len + body.len()) as u16);
            body.push(name.len() as u8);
            body.extend_from_slice(name.as_bytes());
            let mut control = 0u8;
            for (tag, _, mask, end) in Self::TAGS {
                if end & 1 != 0 {
                    continue;
                }
                if tags.iter().any(|(t, _)| *t == tag) {
                    control |= 1 << mask.trailing_zeros();
                }
            }
            body.push(control);
            for (tag, _, _, end) in Self::TAGS {
                if end & 1 != 0 {
                    continue;
                }
                if let Some((_, values)) = tags.iter().find(|(t, _)| *t == tag) {
                    for value in values {
                        write_var_len(&mut body, *value);
                    }
                }
            }
        }

        let mut entry_record = vec![0u8; header_len];
        entry_record[..4].copy_from_slice(b"INDX");
        entry_record[4..8].copy_from_slice(&(header_len as u32).to_be_bytes());
        let idxt_offset = (header_len + body.len()) as u32;
        entry_record[20..24].copy_from_slice(&idxt_offset.to_be_bytes());
        entry_record[24..28].copy_from_slice(&(self.entries.len() as u32).to_be_bytes());
        entry_record.extend_from_slice(&body);
        entry_record.extend_from_slice(b"IDXT");
        for offset in entry_offsets {
            entry_record.extend_from_slice(&offset.to_be_bytes());
        }

        let mut records = vec![header, entry_record];
        if !self.cncx.is_empty() {
            let mut cncx_record = Vec::new();
            for value in &self.cncx {
                write_var_len(&mut cncx_record, value.len() as u32);
                cncx_record.extend_from_slice(value.as_bytes());
            }
            records.push(cncx_record);
        }
        records
    }
}

/// Assembles a complete MOBI container for one side (MOBI6 or KF8).
pub struct MobiBuilder {
    title: String,
    text: String,
    compression: u16,
    version: u32,
    locale_language: u8,
    locale_region: u8,
    exth: Vec<(u32, Vec<u8>)>,
    cover: Option<Vec<u8>>,
    kf8_pointers: Option<Kf8Pointers>,
    extra_records: Vec<Vec<u8>>,
}

/// Record indices (relative to the side's record 0) of the KF8 structures.
#[derive(Clone, Copy)]
pub struct Kf8Pointers {
    pub fdst: u32,
    pub fdst_count: u32,
    pub skel: u32,
    pub frag: u32,
}

impl MobiBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            text: String::new(),
            compression: COMPRESSION_PALMDOC,
            version: 6,
            locale_language: 9,
            locale_region: 0,
            exth: Vec::new(),
            cover: None,
            kf8_pointers: None,
            extra_records: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn locale(mut self, language: u8, region: u8) -> Self {
        self.locale_language = language;
        self.locale_region = region;
        self
    }

    pub fn exth_string(mut self, tag: u32, value: &str) -> Self {
        self.exth.push((tag, value.as_bytes().to_vec()));
        self
    }

    pub fn exth_u32(mut self, tag: u32, value: u32) -> Self {
        self.exth.push((tag, value.to_be_bytes().to_vec()));
        self
    }

    pub fn cover(mut self, bytes: &[u8]) -> Self {
        self.cover = Some(bytes.to_vec());
        self
    }

    pub fn kf8_pointers(mut self, pointers: Kf8Pointers) -> Self {
        self.kf8_pointers = Some(pointers);
        self
    }

    /// Raw records appended after the text (index records, FDST, ...).
    pub fn extra_records(mut self, records: Vec<Vec<u8>>) -> Self {
        self.extra_records = records;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let records = self.side_records();
        let slices: Vec<&[u8]> = records.iter().map(Vec::as_slice).collect();
        build_pdb(&slices)
    }

    /// The side's records without the PDB envelope, for combined files.
    pub fn side_records(&self) -> Vec<Vec<u8>> {
        let text_records = self.text_records();
        let record0 = self.record0(text_records.len());

        let mut records = vec![record0];
        records.extend(text_records);
        records.extend(self.extra_records.iter().cloned());
        if let Some(cover) = &self.cover {
            records.push(cover.clone());
        }
        records
    }

    fn text_records(&self) -> Vec<Vec<u8>> {
        self.text
            .as_bytes()
            .chunks(TEXT_RECORD_SIZE)
            .map(|chunk| {
                if self.compression == COMPRESSION_PALMDOC {
                    palmdoc::compress(chunk)
                } else {
                    chunk.to_vec()
                }
            })
            .collect()
    }

    fn record0(&self, num_text_records: usize) -> Vec<u8> {
        let mut exth_records = self.exth.clone();
        if self.cover.is_some() && !exth_records.iter().any(|(t, _)| *t == tag::COVER_OFFSET) {
            exth_records.push((tag::COVER_OFFSET, 0u32.to_be_bytes().to_vec()));
        }

        let mut exth_block = Vec::new();
        if !exth_records.is_empty() {
            exth_block.extend_from_slice(b"EXTH");
            let total: usize =
                12 + exth_records.iter().map(|(_, d)| d.len() + 8).sum::<usize>();
            exth_block.extend_from_slice(&(total as u32).to_be_bytes());
            exth_block.extend_from_slice(&(exth_records.len() as u32).to_be_bytes());
            for (record_tag, data) in &exth_records {
                exth_block.extend_from_slice(&record_tag.to_be_bytes());
                exth_block.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
                exth_block.extend_from_slice(data);
            }
            while exth_block.len() % 4 != 0 {
                exth_block.push(0);
            }
        }

        let exth_start = 16 + MOBI_HEADER_LEN as usize;
        let full_name_offset = exth_start + exth_block.len();

        let mut record0 = vec![0u8; exth_start];
        record0[0..2].copy_from_slice(&self.compression.to_be_bytes());
        record0[4..8].copy_from_slice(&(self.text.len() as u32).to_be_bytes());
        record0[8..10].copy_from_slice(&(num_text_records as u16).to_be_bytes());
        record0[10..12].copy_from_slice(&(TEXT_RECORD_SIZE as u16).to_be_bytes());

        record0[16..20].copy_from_slice(b"MOBI");
        record0[20..24].copy_from_slice(&MOBI_HEADER_LEN.to_be_bytes());
        record0[24..28].copy_from_slice(&2u32.to_be_bytes());
        record0[28..32].copy_from_slice(&65001u32.to_be_bytes());
        record0[32..36].copy_from_slice(&0x1234u32.to_be_bytes());
        record0[36..40].copy_from_slice(&self.version.to_be_bytes());
        record0[80..84].copy_from_slice(&NULL_INDEX.to_be_bytes());
        record0[84..88].copy_from_slice(&(full_name_offset as u32).to_be_bytes());
        record0[88..92].copy_from_slice(&(self.title.len() as u32).to_be_bytes());
        let locale =
            (u32::from(self.locale_region) << 8) | u32::from(self.locale_language);
        record0[92..96].copy_from_slice(&locale.to_be_bytes());
        let resource_start = if self.cover.is_some() {
            (1 + num_text_records + self.extra_records.len()) as u32
        } else {
            NULL_INDEX
        };
        record0[108..112].copy_from_slice(&resource_start.to_be_bytes());
        record0[112..116].copy_from_slice(&NULL_INDEX.to_be_bytes());
        if !exth_block.is_empty() {
            record0[128..132].copy_from_slice(&0x40u32.to_be_bytes());
        }
        if self.version >= 8 {
            let pointers = self.kf8_pointers.unwrap_or(Kf8Pointers {
                fdst: NULL_INDEX,
                fdst_count: 0,
                skel: NULL_INDEX,
                frag: NULL_INDEX,
            });
            record0[0xC0..0xC4].copy_from_slice(&pointers.fdst.to_be_bytes());
            record0[0xC4..0xC8].copy_from_slice(&pointers.fdst_count.to_be_bytes());
            record0[0xF8..0xFC].copy_from_slice(&pointers.frag.to_be_bytes());
            record0[0xFC..0x100].copy_from_slice(&pointers.skel.to_be_bytes());
            record0[0x104..0x108].copy_from_slice(&NULL_INDEX.to_be_bytes());
        }
        record0[0xF4..0xF8].copy_from_slice(&NULL_INDEX.to_be_bytes());

        record0.extend_from_slice(&exth_block);
        record0.extend_from_slice(self.title.as_bytes());
        record0.extend_from_slice(&[0, 0]);
        record0
    }
}

/// A combined MOBI6 + KF8 file: a legacy side whose EXTH boundary points at
/// the KF8 side's record 0.
pub fn combined_mobi(legacy: MobiBuilder, kf8: MobiBuilder) -> Vec<u8> {
    let legacy_text = legacy.text_records();
    let boundary = (1 + legacy_text.len()) as u32;
    let legacy = legacy.exth_u32(tag::BOUNDARY, boundary);

    let mut records = legacy.side_records();
    records.extend(kf8.side_records());
    let slices: Vec<&[u8]> = records.iter().map(Vec::as_slice).collect();
    build_pdb(&slices)
}
