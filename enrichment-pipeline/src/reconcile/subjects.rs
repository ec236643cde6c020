use std::collections::HashMap;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Where a subject string came from, scheme-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectScheme {
    /// Library of Congress Subject Headings (controlled vocabulary).
    Lcsh,
    FreeText,
}

#[derive(Debug, Clone)]
pub struct SubjectInput {
    pub value: String,
    pub scheme: SubjectScheme,
    pub source: String,
}

/// Grouping form: trimmed, lowercased, diacritics dropped.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Segments of a hierarchical heading (`"A -- B -- C"`).
fn hierarchy_segments(normalized: &str) -> Vec<String> {
    normalized
        .split("--")
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Whether `outer` hierarchically subsumes `inner` (an `"A -- B -- C"`
/// heading covers its `"A"` and `"A -- B"` prefixes).
fn subsumes(outer: &[String], inner: &[String]) -> bool {
    outer.len() > inner.len() && outer.get(..inner.len()) == Some(inner)
}

/// Reconciles subject lists from several records into one list.
///
/// Values group on their normalized form; within a group an LCSH value
/// beats free text of the same form. Headings subsumed by a deeper
/// hierarchical heading are dropped.
pub fn reconcile(inputs: &[SubjectInput]) -> (Vec<String>, Vec<String>) {
    // normalized form -> (display, scheme, sources)
    let mut groups: HashMap<String, (String, SubjectScheme, Vec<String>)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for input in inputs {
        let key = normalize(&input.value);
        if key.is_empty() {
            continue;
        }
        match groups.get_mut(&key) {
            Some((display, scheme, sources)) => {
                if *scheme == SubjectScheme::FreeText && input.scheme == SubjectScheme::Lcsh {
                    *display = input.value.trim().to_string();
                    *scheme = SubjectScheme::Lcsh;
                }
                if !sources.contains(&input.source) {
                    sources.push(input.source.clone());
                }
            }
            None => {
                groups.insert(
                    key.clone(),
                    (
                        input.value.trim().to_string(),
                        input.scheme,
                        vec![input.source.clone()],
                    ),
                );
                order.push(key);
            }
        }
    }

    let segment_map: HashMap<&String, Vec<String>> = order
        .iter()
        .map(|key| (key, hierarchy_segments(key)))
        .collect();

    let mut values = Vec::new();
    let mut sources = Vec::new();
    for key in &order {
        let Some(segments) = segment_map.get(key) else {
            continue;
        };
        let swallowed = order.iter().any(|other| {
            other != key
                && segment_map
                    .get(other)
                    .is_some_and(|outer| subsumes(outer, segments))
        });
        if swallowed {
            continue;
        }
        if let Some((display, _, group_sources)) = groups.get(key) {
            values.push(display.clone());
            for source in group_sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
    }
    (values, sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: &str, scheme: SubjectScheme, source: &str) -> SubjectInput {
        SubjectInput {
            value: value.to_string(),
            scheme,
            source: source.to_string(),
        }
    }

    #[test]
    fn test_groups_on_normalized_form() {
        let (values, sources) = reconcile(&[
            input("Magical Realism", SubjectScheme::FreeText, "a"),
            input("  magical realism ", SubjectScheme::FreeText, "b"),
            input("Mágical Realism", SubjectScheme::FreeText, "c"),
        ]);
        assert_eq!(values, vec!["Magical Realism".to_string()]);
        assert_eq!(sources, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_lcsh_wins_over_free_text() {
        let (values, _) = reconcile(&[
            input("science fiction", SubjectScheme::FreeText, "a"),
            input("Science fiction", SubjectScheme::Lcsh, "b"),
        ]);
        assert_eq!(values, vec!["Science fiction".to_string()]);
    }

    #[test]
    fn test_hierarchical_heading_subsumes_prefixes() {
        let (values, _) = reconcile(&[
            input("Fiction", SubjectScheme::Lcsh, "a"),
            input("Fiction -- History", SubjectScheme::Lcsh, "b"),
            input("Fiction -- History -- 20th century", SubjectScheme::Lcsh, "c"),
            input("Biography", SubjectScheme::Lcsh, "a"),
        ]);
        assert_eq!(
            values,
            vec![
                "Fiction -- History -- 20th century".to_string(),
                "Biography".to_string()
            ]
        );
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let (values, sources) = reconcile(&[input("  ", SubjectScheme::FreeText, "a")]);
        assert!(values.is_empty());
        assert!(sources.is_empty());
    }
}
