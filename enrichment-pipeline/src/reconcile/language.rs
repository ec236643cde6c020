/// Language code normalisation.
///
/// Providers return a mix of ISO 639-1 (`en`), ISO 639-2 / MARC (`eng`,
/// `ger`) and BCP-47 tags (`en-US`). Grouping happens on the ISO 639-1
/// primary subtag wherever a single mapping exists.

/// Maps a MARC / ISO 639-2 code onto ISO 639-1 where a single target
/// exists. Both bibliographic and terminological variants are covered.
pub fn marc_to_iso639_1(code: &str) -> Option<&'static str> {
    Some(match code {
        "eng" => "en",
        "ger" | "deu" => "de",
        "fre" | "fra" => "fr",
        "spa" => "es",
        "ita" => "it",
        "por" => "pt",
        "rus" => "ru",
        "jpn" => "ja",
        "chi" | "zho" => "zh",
        "dut" | "nld" => "nl",
        "swe" => "sv",
        "dan" => "da",
        "nor" => "no",
        "fin" => "fi",
        "pol" => "pl",
        "cze" | "ces" => "cs",
        "gre" | "ell" => "el",
        "hun" => "hu",
        "tur" => "tr",
        "ara" => "ar",
        "heb" => "he",
        "kor" => "ko",
        "ukr" => "uk",
        "rum" | "ron" => "ro",
        "cat" => "ca",
        "hin" => "hi",
        "ice" | "isl" => "is",
        "lat" => "la",
        _ => return None,
    })
}

/// Canonical grouping form: lowercase primary subtag, MARC codes mapped
/// to ISO 639-1. Unknown three-letter codes pass through unchanged.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let primary = lowered
        .split(['-', '_'])
        .next()
        .unwrap_or(lowered.as_str());
    match primary.len() {
        3 => marc_to_iso639_1(primary).unwrap_or(primary).to_string(),
        _ => primary.to_string(),
    }
}

/// Whether a record's language matches the preferred one, across code
/// systems (`spa` matches `es` and `es-MX`).
pub fn matches_preference(candidate: &str, preferred: &str) -> bool {
    !candidate.trim().is_empty() && normalize(candidate) == normalize(preferred)
}
