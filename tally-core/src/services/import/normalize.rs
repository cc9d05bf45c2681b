//! Locale-tolerant amount and date parsing

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use rust_decimal::Decimal;

/// Parse a money amount written with either `,` or `.` as decimal point
///
/// Returns `None` when the value does not describe a number. Rules:
/// - everything except digits, `,`, `.` and `-` is dropped; a value wrapped
///   in parentheses is negative
/// - `-` is only accepted as a leading or trailing sign
/// - with both separators present, the last one is the decimal point
/// - with one separator kind, a single occurrence is the decimal point and
///   repeated occurrences are thousands separators
/// - a trailing separator means a zero fraction
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (parenthesized, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();

    let leading = cleaned.starts_with('-');
    let trailing = cleaned.len() > 1 && cleaned.ends_with('-');
    let unsigned = cleaned.trim_start_matches('-').trim_end_matches('-');
    if unsigned.contains('-') || !unsigned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut number = normalize_separators(unsigned)?;
    if number.starts_with('.') {
        number.insert(0, '0');
    }
    if number.ends_with('.') {
        number.push('0');
    }

    let value = Decimal::from_str(&number).ok()?;
    let negative = (leading || trailing) != parenthesized;
    Some(if negative { -value } else { value })
}

/// Rewrite digits-and-separators into `1234.56` form
fn normalize_separators(s: &str) -> Option<String> {
    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');

    let (decimal, thousands) = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => (Some(','), Some('.')),
        (Some(_), Some(_)) => (Some('.'), Some(',')),
        (Some(_), None) => single_kind(s, ','),
        (None, Some(_)) => single_kind(s, '.'),
        (None, None) => (None, None),
    };

    let mut out = String::with_capacity(s.len());
    let mut seen_decimal = false;
    for c in s.chars() {
        if Some(c) == thousands {
            continue;
        }
        if Some(c) == decimal {
            if seen_decimal {
                return None;
            }
            seen_decimal = true;
            out.push('.');
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn single_kind(s: &str, sep: char) -> (Option<char>, Option<char>) {
    if s.matches(sep).count() == 1 {
        (Some(sep), None)
    } else {
        (None, Some(sep))
    }
}

/// Locale formats tried after ISO-8601, in order
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%Y.%m.%d",
];

const TIME_SUFFIXES: &[&str] = &[" %H:%M:%S", " %H:%M", "T%H:%M:%S"];

const LENIENT_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y%m%d",
];

static ISO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid regex"));

/// Parse a date in any of the supported layouts; never fails
///
/// Falls back to today's local date (with a warning) when nothing matches.
pub fn parse_date(raw: &str) -> NaiveDate {
    match try_parse_date(raw) {
        Some(date) => date,
        None => {
            let today = Local::now().date_naive();
            tracing::warn!(value = raw, fallback = %today, "unrecognized date, using today");
            today
        }
    }
}

/// Strict part of [`parse_date`]: `None` instead of the fallback
pub fn try_parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // ISO-8601 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    for suffix in TIME_SUFFIXES {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, &format!("%Y-%m-%d{}", suffix)) {
            return Some(dt.date());
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
        for suffix in TIME_SUFFIXES {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, &format!("{}{}", fmt, suffix)) {
                return Some(dt.date());
            }
        }
    }

    // lenient
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    for fmt in LENIENT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    let caps = ISO_PREFIX.captures(s)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

/// Normalized textual form of a date
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_amount_dot_decimal() {
        assert_eq!(parse_amount("1234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1,234,567.89"), Some(dec("1234567.89")));
        assert_eq!(parse_amount("-50.00"), Some(dec("-50.00")));
    }

    #[test]
    fn test_amount_comma_decimal() {
        assert_eq!(parse_amount("1500,00"), Some(dec("1500.00")));
        assert_eq!(parse_amount("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("1.234.567,89"), Some(dec("1234567.89")));
        assert_eq!(parse_amount("-0,5"), Some(dec("-0.5")));
    }

    #[test]
    fn test_amount_repeated_single_separator_is_thousands() {
        assert_eq!(parse_amount("1,234,567"), Some(dec("1234567")));
        assert_eq!(parse_amount("1.234.567"), Some(dec("1234567")));
    }

    #[test]
    fn test_amount_trailing_and_leading_separator() {
        assert_eq!(parse_amount("100,"), Some(dec("100")));
        assert_eq!(parse_amount("100."), Some(dec("100")));
        assert_eq!(parse_amount(".5"), Some(dec("0.5")));
    }

    #[test]
    fn test_amount_strips_symbols() {
        assert_eq!(parse_amount("R$ 1.500,00"), Some(dec("1500.00")));
        assert_eq!(parse_amount("$ -12.30"), Some(dec("-12.30")));
        assert_eq!(parse_amount("  42 "), Some(dec("42")));
    }

    #[test]
    fn test_amount_sign_positions() {
        assert_eq!(parse_amount("12.30-"), Some(dec("-12.30")));
        assert_eq!(parse_amount("(100.00)"), Some(dec("-100.00")));
        assert_eq!(parse_amount("12-30"), None);
    }

    #[test]
    fn test_amount_rejects_garbage() {
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount(",."), None);
    }

    #[test]
    fn test_amount_round_trips_both_locales() {
        let values = ["0.01", "7.5", "1234.56", "98765.43", "-1000000.01"];
        for v in values {
            let d = dec(v);
            let negative = d.is_sign_negative();
            let abs = d.abs();
            let int = abs.trunc().to_string();
            let frac = format!("{:.2}", abs.fract()).trim_start_matches('0').to_string();
            let grouped = group_thousands(&int);
            let sign = if negative { "-" } else { "" };

            let us = format!("{}{}{}", sign, grouped.replace('_', ","), frac);
            let eu = format!(
                "{}{}{}",
                sign,
                grouped.replace('_', "."),
                frac.replace('.', ",")
            );
            assert_eq!(parse_amount(&us).unwrap(), d, "us format {}", us);
            assert_eq!(parse_amount(&eu).unwrap(), d, "eu format {}", eu);
        }
    }

    fn group_thousands(int: &str) -> String {
        let digits: Vec<char> = int.chars().collect();
        let mut out = String::new();
        for (i, c) in digits.iter().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push('_');
            }
            out.push(*c);
        }
        out
    }

    #[test]
    fn test_date_iso() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("2024-03-15"), expected);
        assert_eq!(parse_date("2024-03-15T10:20:30+01:00"), expected);
        assert_eq!(parse_date("2024-03-15 10:20:30"), expected);
    }

    #[test]
    fn test_date_locale_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("15/03/2024"), expected);
        assert_eq!(parse_date("03/15/2024"), expected);
        assert_eq!(parse_date("15.03.2024"), expected);
        assert_eq!(parse_date("2024/03/15"), expected);
        assert_eq!(parse_date("15/03/2024 08:30"), expected);
        assert_eq!(parse_date("15 Mar 2024"), expected);
    }

    #[test]
    fn test_date_day_first_wins_when_ambiguous() {
        assert_eq!(
            parse_date("01/02/2024"),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
    }

    #[test]
    fn test_date_is_total() {
        let today = Local::now().date_naive();
        for garbage in ["", "not a date", "32/13/2024", "2024-13-45", "🙂"] {
            let parsed = parse_date(garbage);
            // fallback may cross midnight while the test runs
            assert!((parsed - today).num_days().abs() <= 1, "input {:?}", garbage);
        }
    }

    #[test]
    fn test_format_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(format_date(date), "2024-01-05");
    }
}
