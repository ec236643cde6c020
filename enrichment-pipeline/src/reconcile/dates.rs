/// Publication date parsing with explicit precision.
///
/// Provider dates arrive as anything from `2020-05-01T00:00:00Z` down to
/// a bare year buried in prose. Two dates only conflict when their years
/// differ; within a year the most precise value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        // Drop any time component.
        let date_part = trimmed.split('T').next().unwrap_or(trimmed);

        let mut parts = date_part.split('-');
        if let Some(year) = parts.next().and_then(|p| parse_year(p)) {
            let month = parts.next().and_then(parse_component).filter(|m| (1..=12).contains(m));
            let day = month
                .and(parts.next().and_then(parse_component))
                .filter(|d| (1..=31).contains(d));
            return Some(Self { year, month, day });
        }

        // Fallback: any plausible four-digit year anywhere in the string
        // ("May 2020", "Published 2020").
        let mut digits = String::new();
        for c in date_part.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                if digits.len() == 4 {
                    if let Some(year) = parse_year(&digits) {
                        return Some(Self {
                            year,
                            month: None,
                            day: None,
                        });
                    }
                    digits.clear();
                }
            } else {
                digits.clear();
            }
        }
        None
    }

    pub fn precision(&self) -> DatePrecision {
        match (self.month, self.day) {
            (Some(_), Some(_)) => DatePrecision::Day,
            (Some(_), None) => DatePrecision::Month,
            _ => DatePrecision::Year,
        }
    }

    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.year != other.year
    }

    pub fn to_iso(&self) -> String {
        match (self.month, self.day) {
            (Some(month), Some(day)) => format!("{:04}-{month:02}-{day:02}", self.year),
            (Some(month), None) => format!("{:04}-{month:02}", self.year),
            _ => format!("{:04}", self.year),
        }
    }
}

fn parse_year(part: &str) -> Option<i32> {
    let year: i32 = part.trim().parse().ok()?;
    (1000..=2999).contains(&year).then_some(year)
}

fn parse_component(part: &str) -> Option<u32> {
    part.trim().parse().ok()
}
