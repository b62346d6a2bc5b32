// 🧹 Value Coercion - tolerant parsing of spreadsheet cells
// Dates, money, months and fiscal years arrive in whatever shape the finance
// office exported them in. Everything here returns None instead of failing so
// callers decide how loud to be about it.

use chrono::{Datelike, Duration, NaiveDate};

// ============================================================================
// DATES
// ============================================================================

/// Formats tried in order. First match wins.
///
/// Two-digit year forms come before their four-digit twins: chrono's `%Y`
/// happily reads "24" as year 24.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y/%m/%d",
    "%d-%b-%y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Excel serial dates above this are treated as plain numbers, not days.
const MAX_EXCEL_SERIAL: f64 = 100_000.0;

/// Parse a date from any of the formats we have seen in exports.
///
/// Fallback order:
/// 1. explicit formats in `DATE_FORMATS`
/// 2. RFC 3339 / ISO datetime (date part kept)
/// 3. Excel serial day number (1900 date system)
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    // "2024-03-31T00:00:00" or "2024-03-31 00:00:00"
    if value.len() > 10 && value.is_char_boundary(10) {
        let (head, tail) = value.split_at(10);
        if tail.starts_with('T') || tail.starts_with(' ') {
            if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }

    value.parse::<f64>().ok().and_then(excel_serial_to_date)
}

/// Convert an Excel serial day number to a date.
///
/// Excel counts 1900-01-01 as day 1 and wrongly treats 1900 as a leap year,
/// so the epoch for every serial after Feb 28 1900 is 1899-12-30.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let days = serial.trunc() as i64;
    let epoch = if days < 61 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    epoch.checked_add_signed(Duration::days(days))
}

/// Normalize any accepted date string to `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_date(raw).map(|d| d.format("%Y-%m-%d").to_string())
}

// ============================================================================
// NUMBERS
// ============================================================================

/// Parse a money / numeric cell.
///
/// Accepts "$1,234.50", "1 234", "(500.00)" (accounting negative), "-12",
/// "85.5%". Returns None for empty or non-numeric text.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let mut negative = false;
    if value.starts_with('(') && value.ends_with(')') && value.len() > 2 {
        negative = true;
        value = &value[1..value.len() - 1];
    }

    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '%' | '\u{a0}'))
        .collect();

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    let parsed = cleaned.parse::<f64>().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

/// Parse a whole-number cell ("1,250", "1250.0"). Fractions are rejected.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let value = parse_amount(raw)?;
    if value.fract() != 0.0 {
        return None;
    }
    Some(value as i64)
}

// ============================================================================
// PERIODS
// ============================================================================

const MONTH_NAMES: &[&str] = &[
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

/// Parse a month: 1..=12, a month name or three-letter abbreviation, or a date.
pub fn parse_month(raw: &str) -> Option<u32> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(n) = parse_integer(value) {
        return (1..=12).contains(&n).then_some(n as u32);
    }

    let lower = value.to_lowercase();
    let lower = lower.trim_end_matches('.');
    if lower.len() >= 3 {
        if let Some(idx) = MONTH_NAMES.iter().position(|name| name.starts_with(lower)) {
            return Some(idx as u32 + 1);
        }
    }

    parse_period(value).map(|(_, month)| month)
}

/// Parse a year: "2024", "FY2024", "FY 24", "fy-2024", or a date.
pub fn parse_year(raw: &str) -> Option<i32> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let lower = value.to_lowercase();
    let digits = lower
        .strip_prefix("fy")
        .map(|rest| rest.trim_start_matches(|c: char| c == ' ' || c == '-'))
        .unwrap_or(&lower);

    if let Some(n) = parse_integer(digits) {
        return match n {
            0..=99 => Some(2000 + n as i32),
            1900..=2200 => Some(n as i32),
            _ => None,
        };
    }

    parse_period(value).map(|(year, _)| year)
}

/// Parse a reporting period into (year, month).
///
/// Accepts "2024-03", "03/2024", "Mar 2024", "March 2024", or any full date.
pub fn parse_period(raw: &str) -> Option<(i32, u32)> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(date) = parse_date(value) {
        return Some((date.year(), date.month()));
    }

    // Append a day so chrono can parse month-only forms
    let candidates = [
        (format!("{}-01", value), "%Y-%m-%d"),
        (format!("{}/01", value), "%Y/%m/%d"),
        (format!("01/{}", value), "%d/%m/%Y"),
        (format!("01-{}", value), "%d-%b-%y"),
        (format!("01 {}", value), "%d %b %Y"),
        (format!("01 {}", value), "%d %B %Y"),
    ];
    for (text, format) in candidates.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some((date.year(), date.month()));
        }
    }

    None
}

// ============================================================================
// HEADERS
// ============================================================================

/// Normalize a column header for comparison: lowercase alphanumerics only.
///
/// "HAP Budget Authority ($)" -> "hapbudgetauthority"
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Split a header into lowercase word tokens.
///
/// "Fiscal_Year" and "fiscal year" both become ["fiscal", "year"].
pub fn header_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_fallback_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

        assert_eq!(parse_date("2024-03-31"), Some(expected));
        assert_eq!(parse_date("03/31/2024"), Some(expected));
        assert_eq!(parse_date("3/31/24"), Some(expected));
        assert_eq!(parse_date("31-Mar-2024"), Some(expected));
        assert_eq!(parse_date("March 31, 2024"), Some(expected));
        assert_eq!(parse_date("2024-03-31T00:00:00Z"), Some(expected));
        assert_eq!(parse_date("2024-03-31 12:30:00"), Some(expected));
    }

    #[test]
    fn test_parse_date_excel_serial() {
        // 45382 is 2024-03-31 in Excel's 1900 system
        assert_eq!(
            parse_date("45382"),
            Some(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap())
        );
        assert_eq!(
            excel_serial_to_date(1.0),
            Some(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap())
        );
        assert_eq!(excel_serial_to_date(0.0), None);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("13/45/2024"), None);
    }

    #[test]
    fn test_parse_amount_accounting_formats() {
        assert_eq!(parse_amount("$1,234.50"), Some(1234.50));
        assert_eq!(parse_amount("(500.00)"), Some(-500.0));
        assert_eq!(parse_amount("-12"), Some(-12.0));
        assert_eq!(parse_amount("85.5%"), Some(85.5));
        assert_eq!(parse_amount("  "), None);
        assert_eq!(parse_amount("$"), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("1,250"), Some(1250));
        assert_eq!(parse_integer("1250.0"), Some(1250));
        assert_eq!(parse_integer("12.5"), None);
    }

    #[test]
    fn test_parse_month_and_year() {
        assert_eq!(parse_month("3"), Some(3));
        assert_eq!(parse_month("Mar"), Some(3));
        assert_eq!(parse_month("September"), Some(9));
        assert_eq!(parse_month("Sept."), Some(9));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("2024-07-01"), Some(7));

        assert_eq!(parse_year("2024"), Some(2024));
        assert_eq!(parse_year("FY2025"), Some(2025));
        assert_eq!(parse_year("FY 24"), Some(2024));
        assert_eq!(parse_year("fy-2023"), Some(2023));
        assert_eq!(parse_year("12/31/2022"), Some(2022));
        assert_eq!(parse_year("abc"), None);
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("2024-03"), Some((2024, 3)));
        assert_eq!(parse_period("03/2024"), Some((2024, 3)));
        assert_eq!(parse_period("Mar 2024"), Some((2024, 3)));
        assert_eq!(parse_period("March 2024"), Some((2024, 3)));
        assert_eq!(parse_period("Mar-24"), Some((2024, 3)));
        assert_eq!(parse_period(""), None);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("HAP Budget Authority ($)"), "hapbudgetauthority");
        assert_eq!(normalize_header("fiscal_year"), "fiscalyear");
        assert_eq!(header_tokens("Fiscal_Year (FY)"), vec!["fiscal", "year", "fy"]);
    }
}
