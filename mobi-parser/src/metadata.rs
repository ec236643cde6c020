use crate::exth::{tag, ExthBlock};
use crate::headers::Record0;
use crate::lang;

/// Reading order declared by EXTH 527.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProgression {
    LeftToRight,
    RightToLeft,
}

/// Everything the container knows about the book itself.
///
/// Strings are decoded with the header's text encoding; multi-valued EXTH
/// tags accumulate in order of appearance.
#[derive(Debug, Default, Clone)]
pub struct MobiMetadata {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub contributors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub asin: Option<String>,
    pub sources: Vec<String>,
    pub subjects: Vec<String>,
    pub subject_codes: Vec<String>,
    pub rights: Option<String>,
    pub published: Option<String>,
    pub language: Option<String>,
    pub page_progression: Option<PageProgression>,
    pub fixed_layout: Option<bool>,
    pub num_resources: Option<u32>,
    pub orig_resolution: Option<String>,
    pub uid: u32,
}

/// Synthesizes metadata from the active side's headers and EXTH block.
///
/// Title prefers EXTH 503 over the header's full-name slice; language
/// prefers EXTH 524 over the locale bytes.
pub(crate) fn synthesize(record0: &Record0, exth: Option<&ExthBlock>) -> MobiMetadata {
    let encoding = record0.mobi.encoding;

    let mut metadata = MobiMetadata {
        title: record0.full_name.clone(),
        language: lang::language_tag(record0.mobi.locale_language, record0.mobi.locale_region)
            .map(ToString::to_string),
        uid: record0.mobi.uid,
        ..MobiMetadata::default()
    };

    let Some(exth) = exth else {
        return metadata;
    };

    if let Some(title) = exth.string(tag::TITLE, encoding) {
        if !title.trim().is_empty() {
            metadata.title = Some(title);
        }
    }
    if let Some(language) = exth
        .strings(tag::LANGUAGE, encoding)
        .into_iter()
        .find(|value| !value.trim().is_empty())
    {
        metadata.language = Some(language);
    }

    metadata.creators = exth.strings(tag::CREATOR, encoding);
    metadata.contributors = exth.strings(tag::CONTRIBUTOR, encoding);
    metadata.publisher = exth.string(tag::PUBLISHER, encoding);
    metadata.description = exth.string(tag::DESCRIPTION, encoding);
    metadata.isbn = exth.string(tag::ISBN, encoding);
    metadata.asin = exth.string(tag::ASIN, encoding);
    metadata.sources = exth.strings(tag::SOURCE, encoding);
    metadata.subjects = exth.strings(tag::SUBJECT, encoding);
    metadata.subject_codes = exth.strings(tag::SUBJECT_CODE, encoding);
    metadata.rights = exth.string(tag::RIGHTS, encoding);
    metadata.published = exth.string(tag::DATE, encoding);
    metadata.page_progression =
        exth.string(tag::PAGE_PROGRESSION, encoding)
            .and_then(|value| match value.trim() {
                "rtl" => Some(PageProgression::RightToLeft),
                "ltr" => Some(PageProgression::LeftToRight),
                _ => None,
            });
    metadata.fixed_layout = exth
        .string(tag::FIXED_LAYOUT, encoding)
        .map(|value| value.trim().eq_ignore_ascii_case("true"));
    metadata.num_resources = exth.u32_value(tag::NUM_RESOURCES);
    metadata.orig_resolution = exth.string(tag::ORIG_RESOLUTION, encoding);

    metadata
}
