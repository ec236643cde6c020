use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Honorific prefixes recognised (and dropped) during parsing.
const PREFIXES: [&str; 9] = [
    "dr", "prof", "mr", "mrs", "ms", "sir", "dame", "rev", "fr",
];

/// Generational and academic suffixes kept on the parsed name.
const SUFFIXES: [&str; 9] = [
    "jr", "sr", "ii", "iii", "iv", "phd", "md", "esq", "dds",
];

/// A personal name broken into components.
///
/// Accepts both `"Last, First [Middle...] [, Suffix]"` and
/// `"First [Middle...] Last [Suffix]"` shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonName {
    pub prefixes: Vec<String>,
    pub first: Option<String>,
    pub middles: Vec<String>,
    pub last: String,
    pub suffixes: Vec<String>,
}

impl PersonName {
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = collapse_whitespace(raw);
        if cleaned.is_empty() {
            return None;
        }

        if let Some((last_part, given_part)) = cleaned.split_once(',') {
            // "Last, First Middle[, Suffix]"
            let last = collapse_whitespace(last_part);
            if last.is_empty() {
                return None;
            }
            let mut suffixes = Vec::new();
            let mut chunks = given_part.split(',');
            let given_chunk = chunks.next().unwrap_or_default();
            for chunk in chunks {
                let candidate = collapse_whitespace(chunk);
                if is_suffix(&candidate) {
                    suffixes.push(candidate.trim_end_matches(['.', ',']).to_string());
                }
            }

            let (prefixes, mut given, mut trailing_suffixes) =
                split_tokens(given_chunk.split_whitespace());
            suffixes.append(&mut trailing_suffixes);
            let first = if given.is_empty() {
                None
            } else {
                Some(given.remove(0))
            };
            Some(Self {
                prefixes,
                first,
                middles: given,
                last,
                suffixes,
            })
        } else {
            // "First Middle Last [Suffix]"
            let (prefixes, mut tokens, suffixes) = split_tokens(cleaned.split_whitespace());
            let last = tokens.pop()?;
            let first = if tokens.is_empty() {
                None
            } else {
                Some(tokens.remove(0))
            };
            Some(Self {
                prefixes,
                first,
                middles: tokens,
                last,
                suffixes,
            })
        }
    }

    /// Display form: `"First [Middle] Last[, Suffix]"`.
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if let Some(first) = &self.first {
            parts.push(first.clone());
        }
        parts.extend(self.middles.iter().cloned());
        parts.push(self.last.clone());
        let mut display = parts.join(" ");
        if !self.suffixes.is_empty() {
            display.push_str(", ");
            display.push_str(&self.suffixes.join(" "));
        }
        display
    }

    /// Sorting form: `"Last, First [Middle]"`.
    pub fn sorting_key(&self) -> String {
        let mut given = Vec::new();
        if let Some(first) = &self.first {
            given.push(first.clone());
        }
        given.extend(self.middles.iter().cloned());
        if given.is_empty() {
            self.last.clone()
        } else {
            format!("{}, {}", self.last, given.join(" "))
        }
    }

    fn given_normalized(&self) -> Vec<String> {
        self.first
            .iter()
            .chain(self.middles.iter())
            .map(|name| normalize_component(name))
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Two names match when their last names agree and the given names are
    /// pairwise compatible, treating initials as expandable
    /// (`"J. R. R. Tolkien"` matches `"John Ronald Reuel Tolkien"`).
    pub fn matches(&self, other: &Self) -> bool {
        if normalize_component(&self.last) != normalize_component(&other.last) {
            return false;
        }
        let mine = self.given_normalized();
        let theirs = other.given_normalized();
        mine.iter()
            .zip(theirs.iter())
            .all(|(a, b)| components_compatible(a, b))
    }
}

/// Lowercase, NFD with combining marks stripped, punctuation dropped.
pub fn normalize_component(component: &str) -> String {
    component
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Comparison key for a whole name, independent of component order.
pub fn normalize(raw: &str) -> String {
    match PersonName::parse(raw) {
        Some(name) => {
            let mut parts = name.given_normalized();
            parts.push(normalize_component(&name.last));
            parts.join(" ")
        }
        None => collapse_whitespace(&normalize_component(raw)),
    }
}

/// Canonical display form for arbitrary input; falls back to the trimmed
/// input when the name cannot be parsed.
pub fn canonical_display(raw: &str) -> String {
    PersonName::parse(raw)
        .map(|name| name.display())
        .unwrap_or_else(|| collapse_whitespace(raw))
}

/// Whether two raw name strings refer to the same person.
pub fn names_match(a: &str, b: &str) -> bool {
    match (PersonName::parse(a), PersonName::parse(b)) {
        (Some(a), Some(b)) => a.matches(&b),
        _ => normalize(a) == normalize(b),
    }
}

fn components_compatible(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    // A single letter is an initial and can expand into the other name.
    (a.len() == 1 && b.starts_with(a)) || (b.len() == 1 && a.starts_with(b))
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_prefix(token: &str) -> bool {
    let normalized = normalize_component(token);
    PREFIXES.contains(&normalized.as_str())
}

fn is_suffix(token: &str) -> bool {
    let normalized = normalize_component(token);
    SUFFIXES.contains(&normalized.as_str())
}

/// Splits tokens into (leading prefixes, core names, trailing suffixes).
fn split_tokens<'a>(
    tokens: impl Iterator<Item = &'a str>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let tokens: Vec<&str> = tokens.collect();
    let mut start = 0;
    let mut end = tokens.len();

    let mut prefixes = Vec::new();
    while start < end.saturating_sub(1) && is_prefix(tokens[start]) {
        prefixes.push(tokens[start].to_string());
        start += 1;
    }

    let mut suffixes = Vec::new();
    while end > start + 1 && is_suffix(tokens[end - 1]) {
        suffixes.insert(0, tokens[end - 1].trim_end_matches(['.', ',']).to_string());
        end -= 1;
    }

    let core = tokens[start..end].iter().map(ToString::to_string).collect();
    (prefixes, core, suffixes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_last_comma_first() {
        let name = PersonName::parse("Kehlmann, Daniel").unwrap();
        assert_eq!(name.first.as_deref(), Some("Daniel"));
        assert_eq!(name.last, "Kehlmann");
        assert_eq!(name.display(), "Daniel Kehlmann");
        assert_eq!(name.sorting_key(), "Kehlmann, Daniel");
    }

    #[test]
    fn test_parses_first_last_with_middles() {
        let name = PersonName::parse("John Ronald Reuel Tolkien").unwrap();
        assert_eq!(name.first.as_deref(), Some("John"));
        assert_eq!(name.middles, vec!["Ronald", "Reuel"]);
        assert_eq!(name.last, "Tolkien");
        assert_eq!(name.sorting_key(), "Tolkien, John Ronald Reuel");
    }

    #[test]
    fn test_prefixes_are_dropped_from_display() {
        let name = PersonName::parse("Dr. Jane Goodall").unwrap();
        assert_eq!(name.prefixes, vec!["Dr."]);
        assert_eq!(name.display(), "Jane Goodall");
    }

    #[test]
    fn test_suffixes_survive_both_shapes() {
        let comma = PersonName::parse("King, Martin Luther, Jr.").unwrap();
        assert_eq!(comma.display(), "Martin Luther King, Jr");

        let plain = PersonName::parse("Martin Luther King Jr.").unwrap();
        assert_eq!(plain.suffixes, vec!["Jr"]);
        assert_eq!(plain.last, "King");
    }

    #[test]
    fn test_single_token_is_a_bare_last_name() {
        let name = PersonName::parse("Homer").unwrap();
        assert_eq!(name.first, None);
        assert_eq!(name.last, "Homer");
        assert_eq!(name.sorting_key(), "Homer");
    }

    #[test]
    fn test_initials_match_expanded_names() {
        assert!(names_match("J. R. R. Tolkien", "John Ronald Reuel Tolkien"));
        assert!(names_match("Tolkien, J. R. R.", "John Ronald Reuel Tolkien"));
        assert!(names_match("John Tolkien", "John Ronald Reuel Tolkien"));
        assert!(!names_match("Jane Tolkien", "John Ronald Reuel Tolkien"));
        assert!(!names_match("J. R. R. Tolkien", "John Ronald Reuel Martin"));
    }

    #[test]
    fn test_normalize_is_order_and_diacritic_insensitive() {
        assert_eq!(normalize("Kehlmann, Daniel"), normalize("Daniel Kehlmann"));
        assert_eq!(normalize("Müller, Jürgen"), normalize("Jurgen Muller"));
        assert_eq!(normalize("morrison, toni"), normalize("Toni Morrison"));
    }

    #[test]
    fn test_canonical_display_converts_comma_form() {
        assert_eq!(canonical_display("Kehlmann, Daniel"), "Daniel Kehlmann");
        assert_eq!(canonical_display("Daniel Kehlmann"), "Daniel Kehlmann");
        assert_eq!(canonical_display("  odd   spacing  "), "odd spacing");
    }
}
