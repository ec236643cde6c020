/// ISBN validation and normalisation.
///
/// Inputs may carry hyphens or spaces; the canonical form is ISBN-13
/// without separators. ISBN-10 values convert through the 978 prefix.

pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

pub fn is_valid_isbn10(cleaned: &str) -> bool {
    if cleaned.len() != 10 {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in cleaned.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'X' if i == 9 => 10,
            _ => return false,
        };
        sum += (10 - i as u32) * value;
    }
    sum % 11 == 0
}

pub fn is_valid_isbn13(cleaned: &str) -> bool {
    if cleaned.len() != 13 || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = cleaned
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = c as u32 - '0' as u32;
            if i % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    sum % 10 == 0
}

/// Converts a valid ISBN-10 into its ISBN-13 form.
fn isbn10_to_13(cleaned: &str) -> Option<String> {
    if !is_valid_isbn10(cleaned) {
        return None;
    }
    let body: String = format!("978{}", cleaned.get(..9)?);
    let sum: u32 = body
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = c as u32 - '0' as u32;
            if i % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    Some(format!("{body}{check}"))
}

/// Canonical ISBN-13, if the input validates in either form.
pub fn normalize(raw: &str) -> Option<String> {
    let cleaned = clean(raw);
    if is_valid_isbn13(&cleaned) {
        return Some(cleaned);
    }
    isbn10_to_13(&cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isbn13_checksum() {
        assert!(is_valid_isbn13("9780123456786"));
        assert!(is_valid_isbn13("9783446274860"));
        assert!(!is_valid_isbn13("9780123456787"));
        assert!(!is_valid_isbn13("978012345678"));
        assert!(!is_valid_isbn13("978012345678X"));
    }

    #[test]
    fn test_isbn10_checksum() {
        assert!(is_valid_isbn10("0306406152"));
        assert!(is_valid_isbn10("080442957X"));
        assert!(!is_valid_isbn10("0306406153"));
        assert!(!is_valid_isbn10("0123456789"));
    }

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(
            normalize("978-0-123-45678-6").as_deref(),
            Some("9780123456786")
        );
        assert_eq!(normalize("9780123456786").as_deref(), Some("9780123456786"));
    }

    #[test]
    fn test_normalize_converts_isbn10() {
        assert_eq!(normalize("0-306-40615-2").as_deref(), Some("9780306406157"));
        assert_eq!(normalize("080442957X").as_deref(), Some("9780804429573"));
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert_eq!(normalize("0123456789"), None);
        assert_eq!(normalize("not an isbn"), None);
        assert_eq!(normalize(""), None);
    }
}
