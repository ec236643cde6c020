use lopdf::{Document, Object};
use tracing::debug;

use common::error::AppError;
use common::storage::types::contributor::Relator;

use super::{EmbeddedContributor, EmbeddedMetadata};

/// Reads the PDF document information dictionary.
///
/// Only metadata is consumed here; page content never matters for ingest.
pub fn extract(bytes: &[u8], file_name: &str) -> Result<EmbeddedMetadata, AppError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| AppError::Parse(format!("malformed PDF: {e}")))?;

    let Some(info) = info_dictionary(&doc) else {
        debug!("PDF has no Info dictionary; falling back to the file name");
        return Ok(EmbeddedMetadata::from_filename(file_name));
    };

    let mut metadata = EmbeddedMetadata {
        title: info_string(&doc, info, b"Title"),
        synopsis: info_string(&doc, info, b"Subject"),
        date_published: info_string(&doc, info, b"CreationDate")
            .as_deref()
            .and_then(parse_pdf_date),
        ..EmbeddedMetadata::default()
    };
    if metadata.title.is_none() {
        metadata.title = EmbeddedMetadata::from_filename(file_name).title;
    }

    if let Some(author) = info_string(&doc, info, b"Author") {
        // Multiple authors are conventionally separated by semicolons.
        for name in author.split(';') {
            let name = name.trim();
            if !name.is_empty() {
                metadata.contributors.push(EmbeddedContributor {
                    name: name.to_string(),
                    role: Relator::Aut,
                });
            }
        }
    }

    if let Some(keywords) = info_string(&doc, info, b"Keywords") {
        metadata.subjects = keywords
            .split([',', ';'])
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(ToString::to_string)
            .collect();
    }

    if let Some(producer) = info_string(&doc, info, b"Producer") {
        metadata.properties.insert("pdf_producer".into(), producer);
    }

    Ok(metadata)
}

fn info_dictionary(doc: &Document) -> Option<&lopdf::Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn info_string(doc: &Document, dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    let object = match dict.get(key).ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        object => object,
    };
    match object {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

/// PDF text strings are UTF-16BE when they start with a BOM, otherwise
/// PDFDocEncoding, which is close enough to Latin-1 for metadata.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<u16>>()
            .into_iter()
            .map(|unit| char::from_u32(u32::from(unit)).unwrap_or('\u{FFFD}'))
            .collect();
    }
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

/// `D:YYYYMMDDHHmmSS...` down to whatever precision is present.
fn parse_pdf_date(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    match digits.len() {
        len if len >= 8 => Some(format!(
            "{}-{}-{}",
            &digits[..4],
            &digits[4..6],
            &digits[6..8]
        )),
        len if len >= 6 => Some(format!("{}-{}", &digits[..4], &digits[4..6])),
        len if len >= 4 => Some(digits[..4].to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assembles a valid single-page PDF, xref table included, with an
    /// optional Info dictionary.
    fn sample_pdf(info_entries: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");

        let mut objects = vec![
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n".to_string(),
            "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n".to_string(),
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n"
                .to_string(),
        ];
        if let Some(info) = info_entries {
            objects.push(format!("4 0 obj\n<< {info} >>\nendobj\n"));
        }

        let mut offsets = Vec::new();
        for object in &objects {
            offsets.push(out.len());
            out.extend_from_slice(object.as_bytes());
        }

        let xref_offset = out.len();
        let count = objects.len() + 1;
        out.extend_from_slice(format!("xref\n0 {count}\n").as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        let info_ref = if info_entries.is_some() {
            " /Info 4 0 R"
        } else {
            ""
        };
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {count} /Root 1 0 R{info_ref} >>\nstartxref\n{xref_offset}\n%%EOF\n"
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn test_reads_info_dictionary() {
        let bytes = sample_pdf(Some(
            "/Title (Der Process) /Author (Franz Kafka) /Subject (A trial) \
             /Keywords (Fiction, Classics) /CreationDate (D:19250426120000Z)",
        ));
        let metadata = extract(&bytes, "prozess.pdf").unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Der Process"));
        assert_eq!(metadata.authors(), vec!["Franz Kafka"]);
        assert_eq!(metadata.synopsis.as_deref(), Some("A trial"));
        assert_eq!(
            metadata.subjects,
            vec!["Fiction".to_string(), "Classics".to_string()]
        );
        assert_eq!(metadata.date_published.as_deref(), Some("1925-04-26"));
    }

    #[test]
    fn test_falls_back_to_filename_without_info() {
        let bytes = sample_pdf(None);
        let metadata = extract(&bytes, "some_scanned_book.pdf").unwrap();
        assert_eq!(metadata.title.as_deref(), Some("some scanned book"));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(
            extract(b"%PDF-1.4 then chaos", "x.pdf"),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn test_pdf_date_precision() {
        assert_eq!(parse_pdf_date("D:20200115120000Z").as_deref(), Some("2020-01-15"));
        assert_eq!(parse_pdf_date("D:202001").as_deref(), Some("2020-01"));
        assert_eq!(parse_pdf_date("D:2020").as_deref(), Some("2020"));
        assert_eq!(parse_pdf_date("D:20"), None);
    }

    #[test]
    fn test_utf16_strings_decode() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "Süß".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&bytes), "Süß");
    }
}
