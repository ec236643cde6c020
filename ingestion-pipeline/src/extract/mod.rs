mod mobi;
mod pdf;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::error::AppError;
use common::storage::types::contributor::Relator;

/// Supported container formats, detected by fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Mobi,
    Epub,
    Pdf,
}

impl FileFormat {
    /// Detects the container from its leading bytes: `BOOKMOBI` at offset
    /// 60, `%PDF-`, or a ZIP whose first entry is the EPUB mimetype.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if mobi_parser::is_mobi(bytes) {
            return Some(Self::Mobi);
        }
        if bytes.starts_with(b"%PDF-") {
            return Some(Self::Pdf);
        }
        if bytes.starts_with(b"PK\x03\x04")
            && bytes.get(30..38).is_some_and(|name| name == b"mimetype")
            && contains(bytes.get(..256).unwrap_or(bytes), b"application/epub+zip")
        {
            return Some(Self::Epub);
        }
        None
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Self::Mobi => "application/x-mobipocket-ebook",
            Self::Epub => "application/epub+zip",
            Self::Pdf => "application/pdf",
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedContributor {
    pub name: String,
    pub role: Relator,
}

/// Identifiers a container can embed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Identifier {
    Isbn(String),
    Asin(String),
    Source(String),
}

/// Metadata extracted from the uploaded file itself.
///
/// The cover travels separately from the serializable part: pending-ingest
/// rows snapshot this struct as JSON and must stay small.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub contributors: Vec<EmbeddedContributor>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    pub date_published: Option<String>,
    pub language: Option<String>,
    pub page_progression: Option<String>,
    pub synopsis: Option<String>,
    pub publisher: Option<String>,
    pub rights: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(skip)]
    pub cover: Option<Vec<u8>>,
}

impl EmbeddedMetadata {
    pub fn isbn(&self) -> Option<&str> {
        self.identifiers.iter().find_map(|identifier| match identifier {
            Identifier::Isbn(value) => Some(value.as_str()),
            _ => None,
        })
    }

    /// Names carrying the author relator.
    pub fn authors(&self) -> Vec<&str> {
        self.contributors
            .iter()
            .filter(|contributor| contributor.role == Relator::Aut)
            .map(|contributor| contributor.name.as_str())
            .collect()
    }

    /// Minimal metadata for formats we only detect: the file stem becomes
    /// the title.
    pub fn from_filename(file_name: &str) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.replace(['_', '-'], " ").trim().to_string())
            .filter(|stem| !stem.is_empty());
        Self {
            title: stem,
            ..Self::default()
        }
    }
}

/// Detects the format and extracts whatever metadata the container holds.
pub fn extract(bytes: &[u8], file_name: &str) -> Result<(FileFormat, EmbeddedMetadata), AppError> {
    let format = FileFormat::detect(bytes).ok_or_else(|| {
        AppError::Validation(format!("unsupported media type for {file_name}"))
    })?;

    let metadata = match format {
        FileFormat::Mobi => mobi::extract(bytes)?,
        FileFormat::Pdf => pdf::extract(bytes, file_name)?,
        // EPUB parsing lives in the viewer; ingest only fingerprints it.
        FileFormat::Epub => EmbeddedMetadata::from_filename(file_name),
    };
    debug!(
        format = ?format,
        title = metadata.title.as_deref().unwrap_or("<none>"),
        contributors = metadata.contributors.len(),
        "embedded metadata extracted"
    );
    Ok((format, metadata))
}
