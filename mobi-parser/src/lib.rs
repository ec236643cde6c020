//! Parser for MOBI6 and KF8 (AZW3) ebook containers.
//!
//! A container is opened into an owned [`MobiDocument`] handle; reads borrow
//! the handle and decoded text records are cached on it. Combined
//! MOBI6+KF8 files automatically open on the KF8 side when the EXTH
//! boundary record points at one.

mod error;
mod exth;
mod headers;
mod huffcdic;
mod kf8;
mod lang;
mod metadata;
mod palmdoc;
mod pdb;
mod reader;
mod resources;
mod text;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use error::MobiError;
pub use exth::{tag as exth_tag, ExthBlock};
pub use headers::{Kf8Header, MobiHeader, PalmDocHeader, TextEncoding};
pub use metadata::{MobiMetadata, PageProgression};
pub use pdb::is_mobi;

use headers::{Record0, COMPRESSION_HUFFCDIC, NULL_INDEX};
use huffcdic::HuffCdic;
use pdb::PdbDatabase;
use text::{Decompressor, RawText, TextContext};

/// One reconstructed KF8 section: the skeleton with its fragments spliced in.
pub struct Section {
    pub name: String,
    pub content: String,
}

/// An opened MOBI container.
pub struct MobiDocument {
    pdb: PdbDatabase,
    palmdoc: PalmDocHeader,
    mobi: MobiHeader,
    kf8: Option<Kf8Header>,
    exth: Option<ExthBlock>,
    metadata: MobiMetadata,
    /// Record index the active side starts at (the boundary for KF8 sides).
    record_base: usize,
    /// Resources are always addressed from the first side's header.
    resource_start: Option<usize>,
    decompressor: Decompressor,
    raw: RawText,
}

impl MobiDocument {
    pub fn open(data: Vec<u8>) -> Result<Self, MobiError> {
        if !pdb::is_mobi(&data) {
            return Err(MobiError::InvalidMagic);
        }
        let pdb = PdbDatabase::parse(data)?;

        let mut record_base = 0usize;
        let mut parsed = Record0::parse(pdb.record(0)?)?;
        let mut exth = parse_exth(pdb.record(0)?, &parsed)?;
        let resource_start = index_value(parsed.mobi.resource_start);

        // A MOBI6 header with a boundary record is a combined file; the KF8
        // side becomes the active view and its indices are offset by the
        // boundary.
        if parsed.mobi.version < 8 {
            if let Some(boundary) = exth.as_ref().and_then(ExthBlock::boundary) {
                if boundary < NULL_INDEX && (boundary as usize) < pdb.record_count() {
                    let record0 = pdb.record(boundary as usize)?;
                    parsed = Record0::parse(record0)?;
                    exth = parse_exth(record0, &parsed)?;
                    record_base = boundary as usize;
                }
            }
        }

        let decompressor = build_decompressor(&pdb, &parsed, record_base)?;
        let metadata = metadata::synthesize(&parsed, exth.as_ref());

        Ok(Self {
            pdb,
            palmdoc: parsed.palmdoc,
            mobi: parsed.mobi,
            kf8: parsed.kf8,
            exth,
            metadata,
            record_base,
            resource_start,
            decompressor,
            raw: RawText::default(),
        })
    }

    pub fn metadata(&self) -> &MobiMetadata {
        &self.metadata
    }

    pub fn exth(&self) -> Option<&ExthBlock> {
        self.exth.as_ref()
    }

    pub fn is_kf8(&self) -> bool {
        self.kf8.is_some()
    }

    pub fn version(&self) -> u32 {
        self.mobi.version
    }

    pub fn encoding(&self) -> TextEncoding {
        self.mobi.encoding
    }

    /// The complete decompressed text stream of the active side.
    pub fn raw_text(&mut self) -> Result<Vec<u8>, MobiError> {
        let ctx = make_context(&self.pdb, &self.palmdoc, &self.mobi, self.record_base);
        self.raw.all(&ctx, &mut self.decompressor)
    }

    /// Decoded text of the active side.
    pub fn text(&mut self) -> Result<String, MobiError> {
        let bytes = self.raw_text()?;
        Ok(self.mobi.encoding.decode(&bytes))
    }

    /// A byte range of the virtual raw text stream.
    pub fn raw_range(&mut self, start: usize, end: usize) -> Result<Vec<u8>, MobiError> {
        let ctx = make_context(&self.pdb, &self.palmdoc, &self.mobi, self.record_base);
        self.raw.range(&ctx, &mut self.decompressor, start, end)
    }

    /// Reconstructs the KF8 sections from the SKEL and FRAG indices.
    pub fn sections(&mut self) -> Result<Vec<Section>, MobiError> {
        let kf8 = self
            .kf8
            .ok_or_else(|| MobiError::header("KF8", "not a KF8 container"))?;
        let skel_index = index_value(kf8.skel_index)
            .ok_or_else(|| MobiError::index("SKEL", "container declares no skeleton index"))?;
        let frag_index = index_value(kf8.frag_index)
            .ok_or_else(|| MobiError::index("FRAG", "container declares no fragment index"))?;

        let skel = kf8::read_index(&self.pdb, self.record_base + skel_index)?;
        let frag = kf8::read_index(&self.pdb, self.record_base + frag_index)?;
        let skel_table = kf8::skeleton_table(&skel)?;
        let frag_table = kf8::fragment_table(&frag)?;

        let mut sections = Vec::with_capacity(skel_table.len());
        let mut frag_pos = 0usize;
        for entry in skel_table {
            let frags = frag_table
                .get(frag_pos..frag_pos + entry.num_frags)
                .ok_or_else(|| {
                    MobiError::index("FRAG", "skeleton claims more fragments than exist")
                })?;
            frag_pos += entry.num_frags;

            let total: usize = entry.length + frags.iter().map(|f| f.length).sum::<usize>();
            let ctx = make_context(&self.pdb, &self.palmdoc, &self.mobi, self.record_base);
            let raw = self
                .raw
                .range(&ctx, &mut self.decompressor, entry.offset, entry.offset + total)?;

            let mut skeleton = raw
                .get(..entry.length)
                .ok_or_else(|| MobiError::index("SKEL", "skeleton range past end of text"))?
                .to_vec();
            for fragment in frags {
                let insert = fragment
                    .insert_offset
                    .checked_sub(entry.offset)
                    .filter(|insert| *insert <= skeleton.len())
                    .ok_or_else(|| {
                        MobiError::index("FRAG", "fragment insert offset outside skeleton")
                    })?;
                let data = raw
                    .get(entry.length + fragment.offset
                        ..entry.length + fragment.offset + fragment.length)
                    .ok_or_else(|| {
                        MobiError::index("FRAG", "fragment range past end of section")
                    })?;
                skeleton.splice(insert..insert, data.iter().copied());
            }
            sections.push(Section {
                name: entry.name,
                content: self.mobi.encoding.decode(&skeleton),
            });
        }
        Ok(sections)
    }

    /// The FDST flows of a KF8 container, decoded.
    pub fn flows(&mut self) -> Result<Vec<String>, MobiError> {
        let kf8 = self
            .kf8
            .ok_or_else(|| MobiError::header("KF8", "not a KF8 container"))?;
        let fdst_record = index_value(kf8.fdst_record)
            .ok_or_else(|| MobiError::index("FDST", "container declares no flow table"))?;
        let ranges = kf8::parse_fdst(self.pdb.record(self.record_base + fdst_record)?)?;

        let mut flows = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let ctx = make_context(&self.pdb, &self.palmdoc, &self.mobi, self.record_base);
            let bytes = self.raw.range(&ctx, &mut self.decompressor, start, end)?;
            flows.push(self.mobi.encoding.decode(&bytes));
        }
        Ok(flows)
    }

    /// The cover image, located through EXTH 201 with EXTH 202 as fallback.
    pub fn cover(&self) -> Result<Option<Vec<u8>>, MobiError> {
        let Some(exth) = &self.exth else {
            return Ok(None);
        };
        let offset = exth
            .u32_value(exth::tag::COVER_OFFSET)
            .filter(|offset| *offset != NULL_INDEX)
            .or_else(|| {
                exth.u32_value(exth::tag::THUMBNAIL_OFFSET)
                    .filter(|offset| *offset != NULL_INDEX)
            });
        match offset {
            Some(offset) => self.resource(offset as usize),
            None => Ok(None),
        }
    }

    /// Resource record `index`, counted from the container's resource start.
    pub fn resource(&self, index: usize) -> Result<Option<Vec<u8>>, MobiError> {
        let Some(base) = self.resource_start else {
            return Ok(None);
        };
        let record = self.pdb.record(base + index)?;
        resources::decode_resource(record).map(Some)
    }
}

fn parse_exth(record0: &[u8], parsed: &Record0) -> Result<Option<ExthBlock>, MobiError> {
    if !parsed.mobi.has_exth() {
        return Ok(None);
    }
    ExthBlock::parse(record0, 16 + parsed.mobi.header_length as usize).map(Some)
}

fn build_decompressor(
    pdb: &PdbDatabase,
    parsed: &Record0,
    record_base: usize,
) -> Result<Decompressor, MobiError> {
    let huffcdic = if parsed.palmdoc.compression == COMPRESSION_HUFFCDIC {
        let huff_index = index_value(parsed.mobi.huff_record).ok_or_else(|| {
            MobiError::header("MOBI", "HUFF/CDIC compression without a HUFF record pointer")
        })?;
        let first = record_base + huff_index;
        let huff = pdb.record(first)?;
        let mut cdics = Vec::new();
        for i in 1..parsed.mobi.huff_count as usize {
            cdics.push(pdb.record(first + i)?);
        }
        Some(HuffCdic::new(huff, &cdics)?)
    } else {
        None
    };
    Decompressor::for_compression(parsed.palmdoc.compression, huffcdic)
}

fn index_value(value: u32) -> Option<usize> {
    (value != NULL_INDEX).then_some(value as usize)
}

fn make_context<'a>(
    pdb: &'a PdbDatabase,
    palmdoc: &PalmDocHeader,
    mobi: &MobiHeader,
    record_base: usize,
) -> TextContext<'a> {
    TextContext {
        pdb,
        first_text_record: record_base + 1,
        num_text_records: usize::from(palmdoc.num_text_records),
        text_length: palmdoc.text_length as usize,
        extra_data_flags: mobi.extra_data_flags,
    }
}
