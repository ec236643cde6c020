use std::collections::HashMap;

use crate::error::MobiError;
use crate::pdb::PdbDatabase;
use crate::reader::{var_len, ByteReader};

const IDXT_OFFSET: usize = 20;
const ENTRY_COUNT_OFFSET: usize = 24;
const CNCX_COUNT_OFFSET: usize = 52;

/// One parsed index entry: its name plus tag values keyed by TAGX tag id.
pub struct IndexEntry {
    pub name: String,
    pub tags: HashMap<u8, Vec<u32>>,
}

impl IndexEntry {
    fn tag_value(&self, tag: u8, position: usize) -> Option<u32> {
        self.tags.get(&tag).and_then(|values| values.get(position)).copied()
    }
}

/// A fully parsed INDX index: entries in record order plus CNCX strings.
pub struct Index {
    pub entries: Vec<IndexEntry>,
    pub cncx: HashMap<u32, String>,
}

struct TagDef {
    tag: u8,
    num_values: u8,
    mask: u8,
    end: u8,
}

/// Reads the index rooted at `index_record`: the INDX header record with its
/// TAGX table, `count` entry records, then any CNCX string records.
pub fn read_index(pdb: &PdbDatabase, index_record: usize) -> Result<Index, MobiError> {
    let header = pdb.record(index_record)?;
    let reader = ByteReader::new(header);
    if reader.magic(0)? != b"INDX" {
        return Err(MobiError::index("INDX", "missing INDX magic"));
    }
    let header_length = reader.u32(4)? as usize;
    let record_count = reader.u32(ENTRY_COUNT_OFFSET)? as usize;
    let cncx_count = reader.u32(CNCX_COUNT_OFFSET)? as usize;

    let tag_table = parse_tagx(header, header_length)?;
    let num_control_bytes = ByteReader::new(header).u32(header_length + 8)? as usize;

    let mut cncx = HashMap::new();
    for i in 0..cncx_count {
        let record = pdb.record(index_record + 1 + record_count + i)?;
        load_cncx(record, (i as u32) << 16, &mut cncx)?;
    }

    let mut entries = Vec::new();
    for i in 0..record_count {
        let record = pdb.record(index_record + 1 + i)?;
        parse_entry_record(record, &tag_table, num_control_bytes, &mut entries)?;
    }

    Ok(Index { entries, cncx })
}

fn parse_tagx(header: &[u8], offset: usize) -> Result<Vec<TagDef>, MobiError> {
    let reader = ByteReader::new(header);
    if reader.magic(offset)? != b"TAGX" {
        return Err(MobiError::index("TAGX", "missing TAGX magic"));
    }
    let length = reader.u32(offset + 4)? as usize;
    if length < 12 || length % 4 != 0 {
        return Err(MobiError::index("TAGX", format!("implausible length {length}")));
    }
    let mut tags = Vec::with_capacity((length - 12) / 4);
    for i in 0..(length - 12) / 4 {
        let entry = reader.slice(offset + 12 + i * 4, 4)?;
        tags.push(TagDef {
            tag: entry[0],
            num_values: entry[1],
            mask: entry[2],
            end: entry[3],
        });
    }
    Ok(tags)
}

fn load_cncx(
    record: &[u8],
    key_base: u32,
    cncx: &mut HashMap<u32, String>,
) -> Result<(), MobiError> {
    let mut pos = 0usize;
    while pos < record.len() {
        // Trailing padding is all zeroes; a zero length byte ends the record.
        if record.get(pos) == Some(&0) {
            break;
        }
        let (length, consumed) = var_len(record, pos)?;
        let start = pos + consumed;
        let end = start + length as usize;
        let bytes = record.get(start..end).ok_or_else(|| {
            MobiError::index("CNCX", format!("string at {pos} runs past the record"))
        })?;
        cncx.insert(key_base + pos as u32, String::from_utf8_lossy(bytes).into_owned());
        pos = end;
    }
    Ok(())
}

fn parse_entry_record(
    record: &[u8],
    tag_table: &[TagDef],
    num_control_bytes: usize,
    entries: &mut Vec<IndexEntry>,
) -> Result<(), MobiError> {
    let reader = ByteReader::new(record);
    if reader.magic(0)? != b"INDX" {
        return Err(MobiError::index("INDX", "entry record lacks INDX magic"));
    }
    let idxt = reader.u32(IDXT_OFFSET)? as usize;
    let entry_count = reader.u32(ENTRY_COUNT_OFFSET)? as usize;
    if reader.magic(idxt)? != b"IDXT" {
        return Err(MobiError::index("IDXT", "missing IDXT magic"));
    }

    for i in 0..entry_count {
        let entry_offset = reader.u16(idxt + 4 + i * 2)? as usize;
        entries.push(parse_entry(record, entry_offset, tag_table, num_control_bytes)?);
    }
    Ok(())
}

enum PendingValues {
    /// That many value groups follow inline.
    Groups(u32),
    /// A byte-length-delimited run of values follows.
    Bytes(u32),
}

fn parse_entry(
    record: &[u8],
    offset: usize,
    tag_table: &[TagDef],
    num_control_bytes: usize,
) -> Result<IndexEntry, MobiError> {
    let reader = ByteReader::new(record);
    let name_length = reader.u8(offset)? as usize;
    let name_bytes = reader.slice(offset + 1, name_length)?;
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let control_base = offset + 1 + name_length;
    let mut pos = control_base + num_control_bytes;
    let mut control_index = 0usize;

    let mut pending: Vec<(&TagDef, PendingValues)> = Vec::new();
    for def in tag_table {
        if def.end & 1 != 0 {
            control_index += 1;
            continue;
        }
        let control = reader.u8(control_base + control_index)?;
        let value = control & def.mask;
        if value == 0 {
            continue;
        }
        if value == def.mask && def.mask.count_ones() > 1 {
            // Saturated multi-bit mask: a varint byte count follows.
            let (byte_count, consumed) = var_len(record, pos)?;
            pos += consumed;
            pending.push((def, PendingValues::Bytes(byte_count)));
        } else {
            let groups = u32::from(value >> def.mask.trailing_zeros());
            pending.push((def, PendingValues::Groups(groups)));
        }
    }

    let mut tags: HashMap<u8, Vec<u32>> = HashMap::new();
    for (def, shape) in pending {
        let values = tags.entry(def.tag).or_default();
        match shape {
            PendingValues::Groups(groups) => {
                for _ in 0..groups * u32::from(def.num_values) {
                    let (value, consumed) = var_len(record, pos)?;
                    values.push(value);
                    pos += consumed;
                }
            }
            PendingValues::Bytes(byte_count) => {
                let end = pos + byte_count as usize;
                while pos < end {
                    let (value, consumed) = var_len(record, pos)?;
                    values.push(value);
                    pos += consumed;
                }
            }
        }
    }

    Ok(IndexEntry { name, tags })
}

/// A skeleton: the static XHTML scaffold of one section.
pub struct SkelEntry {
    pub name: String,
    pub num_frags: usize,
    pub offset: usize,
    pub length: usize,
}

/// A fragment spliced into a skeleton at `insert_offset`.
pub struct FragEntry {
    pub insert_offset: usize,
    pub selector: String,
    pub file_index: usize,
    pub offset: usize,
    pub length: usize,
}

pub fn skeleton_table(index: &Index) -> Result<Vec<SkelEntry>, MobiError> {
    index
        .entries
        .iter()
        .map(|entry| {
            let geometry_error =
                || MobiError::index("SKEL", format!("entry {} lacks geometry tags", entry.name));
            Ok(SkelEntry {
                name: entry.name.clone(),
                num_frags: entry.tag_value(1, 0).ok_or_else(geometry_error)? as usize,
                offset: entry.tag_value(6, 0).ok_or_else(geometry_error)? as usize,
                length: entry.tag_value(6, 1).ok_or_else(geometry_error)? as usize,
            })
        })
        .collect()
}

pub fn fragment_table(index: &Index) -> Result<Vec<FragEntry>, MobiError> {
    index
        .entries
        .iter()
        .map(|entry| {
            let geometry_error =
                || MobiError::index("FRAG", format!("entry {} lacks geometry tags", entry.name));
            let insert_offset = entry.name.trim().parse::<usize>().map_err(|_| {
                MobiError::index(
                    "FRAG",
                    format!("entry name {:?} is not an insert offset", entry.name),
                )
            })?;
            let selector = entry
                .tag_value(2, 0)
                .and_then(|key| index.cncx.get(&key).cloned())
                .unwrap_or_default();
            Ok(FragEntry {
                insert_offset,
                selector,
                file_index: entry.tag_value(4, 0).ok_or_else(geometry_error)? as usize,
                offset: entry.tag_value(6, 0).ok_or_else(geometry_error)? as usize,
                length: entry.tag_value(6, 1).ok_or_else(geometry_error)? as usize,
            })
        })
        .collect()
}

/// FDST flow table: `(start, end)` byte ranges of the virtual raw text.
pub fn parse_fdst(record: &[u8]) -> Result<Vec<(usize, usize)>, MobiError> {
    let reader = ByteReader::new(record);
    if reader.magic(0)? != b"FDST" {
        return Err(MobiError::index("FDST", "missing FDST magic"));
    }
    let entries_offset = reader.u32(4)? as usize;
    let count = reader.u32(8)? as usize;
    let mut flows = Vec::with_capacity(count);
    for i in 0..count {
        let base = entries_offset + i * 8;
        flows.push((reader.u32(base)? as usize, reader.u32(base + 4)? as usize));
    }
    Ok(flows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdb, IndexBuilder};

    #[test]
    fn test_reads_skeleton_index() {
        let records = IndexBuilder::new()
            .entry("SKEL0000000", &[(1, vec![2]), (6, vec![0, 100])])
            .entry("SKEL0000001", &[(1, vec![0]), (6, vec![340, 60])])
            .build();
        let slices: Vec<&[u8]> = records.iter().map(Vec::as_slice).collect();
        let pdb = PdbDatabase::parse(build_pdb(&slices)).unwrap();

        let index = read_index(&pdb, 0).unwrap();
        let skel = skeleton_table(&index).unwrap();
        assert_eq!(skel.len(), 2);
        assert_eq!(skel[0].num_frags, 2);
        assert_eq!(skel[0].offset, 0);
        assert_eq!(skel[0].length, 100);
        assert_eq!(skel[1].name, "SKEL0000001");
        assert_eq!(skel[1].offset, 340);
    }

    #[test]
    fn test_reads_fragment_index_with_cncx_selectors() {
        let records = IndexBuilder::new()
            .cncx(&["P-//*[@id=\"part1\"]"])
            .entry("0000000042", &[(2, vec![0]), (4, vec![0]), (6, vec![10, 25])])
            .build();
        let slices: Vec<&[u8]> = records.iter().map(Vec::as_slice).collect();
        let pdb = PdbDatabase::parse(build_pdb(&slices)).unwrap();

        let index = read_index(&pdb, 0).unwrap();
        let frags = fragment_table(&index).unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].insert_offset, 42);
        assert_eq!(frags[0].selector, "P-//*[@id=\"part1\"]");
        assert_eq!(frags[0].offset, 10);
        assert_eq!(frags[0].length, 25);
    }

    #[test]
    fn test_fdst_flows() {
        let mut record = Vec::new();
        record.extend_from_slice(b"FDST");
        record.extend_from_slice(&12u32.to_be_bytes());
        record.extend_from_slice(&2u32.to_be_bytes());
        for (start, end) in [(0u32, 400u32), (400, 900)] {
            record.extend_from_slice(&start.to_be_bytes());
            record.extend_from_slice(&end.to_be_bytes());
        }
        assert_eq!(parse_fdst(&record).unwrap(), vec![(0, 400), (400, 900)]);
        assert!(parse_fdst(b"FDSX").is_err());
    }

    #[test]
    fn test_rejects_missing_indx_magic() {
        let pdb = PdbDatabase::parse(build_pdb(&[b"not an index"])).unwrap();
        assert!(read_index(&pdb, 0).is_err());
    }
}
