use crate::error::MobiError;
use crate::headers::{COMPRESSION_HUFFCDIC, COMPRESSION_NONE, COMPRESSION_PALMDOC};
use crate::huffcdic::HuffCdic;
use crate::palmdoc;
use crate::pdb::PdbDatabase;

/// Per-record decompression, chosen once from the PalmDOC header.
pub(crate) enum Decompressor {
    Literal,
    PalmDoc,
    HuffCdic(Box<HuffCdic>),
}

impl Decompressor {
    pub(crate) fn for_compression(
        compression: u16,
        huffcdic: Option<HuffCdic>,
    ) -> Result<Self, MobiError> {
        match compression {
            COMPRESSION_NONE => Ok(Self::Literal),
            COMPRESSION_PALMDOC => Ok(Self::PalmDoc),
            COMPRESSION_HUFFCDIC => huffcdic
                .map(|decoder| Self::HuffCdic(Box::new(decoder)))
                .ok_or_else(|| {
                    MobiError::header("MOBI", "HUFF/CDIC compression without HUFF records")
                }),
            other => Err(MobiError::BadCompression(other)),
        }
    }

    fn decompress(&mut self, data: &[u8], record: usize) -> Result<Vec<u8>, MobiError> {
        match self {
            Self::Literal => Ok(data.to_vec()),
            Self::PalmDoc => palmdoc::decompress(data, record),
            Self::HuffCdic(decoder) => decoder.decompress(data, record),
        }
    }
}

/// Strips the optional trailing sections appended to every text record.
///
/// `flags` comes from the MOBI header: bit 0 marks multibyte overlap bytes,
/// each further set bit one variable-length trailing section. Sizes are
/// backward varints over the last four bytes; the high bit marks the start
/// of the quantity and the size includes the varint bytes themselves.
pub(crate) fn trim_trailing_entries(data: &[u8], flags: u16) -> &[u8] {
    let mut data = data;
    let mut sections = flags >> 1;
    while sections > 0 {
        if sections & 1 != 0 {
            let size = trailing_entry_size(data);
            data = &data[..data.len().saturating_sub(size)];
        }
        sections >>= 1;
    }
    if flags & 1 != 0 {
        if let Some(&last) = data.last() {
            let extra = usize::from(last & 0b11) + 1;
            data = &data[..data.len().saturating_sub(extra)];
        }
    }
    data
}

fn slice_or_empty(data: &[u8], start: usize, end: usize) -> Vec<u8> {
    data.get(start..end).map(<[u8]>::to_vec).unwrap_or_default()
}

fn trailing_entry_size(data: &[u8]) -> usize {
    let start = data.len().saturating_sub(4);
    let mut value = 0usize;
    for &byte in data.get(start..).unwrap_or_default() {
        if byte & 0x80 != 0 {
            value = 0;
        }
        value = (value << 7) | usize::from(byte & 0x7F);
    }
    value
}

/// Everything needed to locate and decode one side's text records.
pub(crate) struct TextContext<'a> {
    pub pdb: &'a PdbDatabase,
    /// Absolute record index of the first text record.
    pub first_text_record: usize,
    pub num_text_records: usize,
    /// Uncompressed text length declared by the PalmDOC header.
    pub text_length: usize,
    pub extra_data_flags: u16,
}

impl TextContext<'_> {
    fn record_bytes(
        &self,
        decompressor: &mut Decompressor,
        index: usize,
    ) -> Result<Vec<u8>, MobiError> {
        let record = self.first_text_record + index;
        let data = self.pdb.record(record)?;
        let trimmed = trim_trailing_entries(data, self.extra_data_flags);
        decompressor.decompress(trimmed, record)
    }
}

/// Bidirectional cache over the decompressed text stream.
///
/// KF8 skeleton offsets address a virtual contiguous byte stream; sections
/// near the end are cheaper to reach by decompressing records backwards
/// from the tail, so whichever cached end is closer to a requested range is
/// extended first.
#[derive(Default)]
pub(crate) struct RawText {
    head: Vec<u8>,
    head_records: usize,
    tail: Vec<u8>,
    tail_records: usize,
}

impl RawText {
    /// Returns `[start, end)` of the virtual text stream, clamped to the
    /// bytes that actually exist.
    pub(crate) fn range(
        &mut self,
        ctx: &TextContext<'_>,
        decompressor: &mut Decompressor,
        start: usize,
        end: usize,
    ) -> Result<Vec<u8>, MobiError> {
        if end <= start {
            return Ok(Vec::new());
        }

        if self.head.len() >= end {
            return Ok(slice_or_empty(&self.head, start, end));
        }
        let tail_start = ctx.text_length.saturating_sub(self.tail.len());
        if self.tail_records > 0 && start >= tail_start {
            let clamped = end.min(ctx.text_length);
            return Ok(slice_or_empty(&self.tail, start - tail_start, clamped - tail_start));
        }

        let head_distance = end.saturating_sub(self.head.len());
        let tail_distance = tail_start.saturating_sub(start);
        if head_distance <= tail_distance || self.tail_records >= ctx.num_text_records {
            self.extend_head(ctx, decompressor, end)?;
            let clamped_end = end.min(self.head.len());
            let clamped_start = start.min(clamped_end);
            Ok(slice_or_empty(&self.head, clamped_start, clamped_end))
        } else {
            self.extend_tail(ctx, decompressor, start)?;
            let tail_start = ctx.text_length.saturating_sub(self.tail.len());
            let clamped_end = end.min(ctx.text_length);
            Ok(slice_or_empty(
                &self.tail,
                start.saturating_sub(tail_start),
                clamped_end.saturating_sub(tail_start),
            ))
        }
    }

    /// Returns the complete decompressed text stream.
    pub(crate) fn all(
        &mut self,
        ctx: &TextContext<'_>,
        decompressor: &mut Decompressor,
    ) -> Result<Vec<u8>, MobiError> {
        self.extend_head(ctx, decompressor, usize::MAX)?;
        Ok(self.head.clone())
    }

    fn extend_head(
        &mut self,
        ctx: &TextContext<'_>,
        decompressor: &mut Decompressor,
        end: usize,
    ) -> Result<(), MobiError> {
        while self.head.len() < end && self.head_records < ctx.num_text_records {
            let bytes = ctx.record_bytes(decompressor, self.head_records)?;
            self.head.extend_from_slice(&bytes);
            self.head_records += 1;
        }
        Ok(())
    }

    fn extend_tail(
        &mut self,
        ctx: &TextContext<'_>,
        decompressor: &mut Decompressor,
        start: usize,
    ) -> Result<(), MobiError> {
        while ctx.text_length.saturating_sub(self.tail.len()) > start
            && self.tail_records < ctx.num_text_records
        {
            let index = ctx.num_text_records - 1 - self.tail_records;
            let mut bytes = ctx.record_bytes(decompressor, index)?;
            bytes.extend_from_slice(&self.tail);
            self.tail = bytes;
            self.tail_records += 1;
        }
        Ok(())
    }
}
