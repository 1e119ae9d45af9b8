use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").unwrap());

/// Listing text meaning "available immediately".
const IMMEDIATELY: &[&str] = &["sofort", "ab sofort", "sofort frei", "sofort verfügbar"];

/// German-formatted number: keep digits and the decimal comma, then parse.
/// `"1.250,50 €"` → `1250.5`, `"78,5 m²"` → `78.5`.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    kept.replace(',', ".").parse().ok()
}

pub fn parse_integer(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `dd.mm.yyyy` anywhere in the text, or `today` for an "immediately" marker.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();
    if IMMEDIATELY.contains(&lower.as_str()) {
        return Some(today);
    }
    let caps = DATE_RE.captures(text)?;
    let day = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whitespace-separated token `index`, if there is one.
pub fn token(text: &str, index: usize) -> Option<&str> {
    text.split_whitespace().nth(index)
}
