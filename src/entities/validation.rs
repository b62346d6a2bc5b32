// 📐 Field Validation
// Collects every field problem in one pass so the client can fix them together.

use crate::coerce;
use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Render a list of field errors as one line, for logs and import reports.
pub fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// Accumulating validator.
///
/// Each check records an error and keeps going; `finish()` hands back the list.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, "Required field is empty");
        }
        self
    }

    pub fn year(&mut self, field: &str, value: i32) -> &mut Self {
        if !(MIN_YEAR..=MAX_YEAR).contains(&value) {
            self.error(
                field,
                format!("Must be between {} and {}, got {}", MIN_YEAR, MAX_YEAR, value),
            );
        }
        self
    }

    pub fn month(&mut self, field: &str, value: i32) -> &mut Self {
        if !(1..=12).contains(&value) {
            self.error(field, format!("Must be between 1 and 12, got {}", value));
        }
        self
    }

    pub fn non_negative(&mut self, field: &str, value: f64) -> &mut Self {
        if !value.is_finite() || value < 0.0 {
            self.error(field, format!("Must be zero or greater, got {}", value));
        }
        self
    }

    pub fn positive(&mut self, field: &str, value: f64) -> &mut Self {
        if !value.is_finite() || value <= 0.0 {
            self.error(field, format!("Must be greater than zero, got {}", value));
        }
        self
    }

    pub fn non_negative_count(&mut self, field: &str, value: i64) -> &mut Self {
        if value < 0 {
            self.error(field, format!("Must be zero or greater, got {}", value));
        }
        self
    }

    /// Dates are stored as `YYYY-MM-DD`; anything else is rejected here.
    pub fn iso_date(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, "Required field is empty");
        } else if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
            self.error(field, format!("Invalid date (expected YYYY-MM-DD): {}", value));
        }
        self
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        if !allowed.contains(&value) {
            self.error(
                field,
                format!("Must be one of [{}], got '{}'", allowed.join(", "), value),
            );
        }
        self
    }

    pub fn finish(&mut self) -> Vec<FieldError> {
        std::mem::take(&mut self.errors)
    }
}

/// Rewrite a loosely formatted date in place to `YYYY-MM-DD`.
///
/// Unparseable values are left untouched so validation reports them verbatim.
pub fn normalize_date_field(value: &mut String) {
    if let Some(iso) = coerce::normalize_date(value) {
        *value = iso;
    }
}

/// Map `value` onto the canonical spelling in `allowed`, ignoring case and
/// surrounding whitespace.
pub fn canonicalize(value: &mut String, allowed: &[&str]) {
    let trimmed = value.trim();
    if let Some(canonical) = allowed
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(trimmed))
    {
        *value = canonical.to_string();
    }
}

/// Round to cents.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_collects_all_errors() {
        let errors = Validator::new()
            .non_empty("name", "  ")
            .year("fiscal_year", 1999)
            .month("month", 13)
            .non_negative("amount", -1.0)
            .iso_date("as_of_date", "03/31/2024")
            .finish();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["name", "fiscal_year", "month", "amount", "as_of_date"]
        );
    }

    #[test]
    fn test_validator_passes_clean_values() {
        let errors = Validator::new()
            .non_empty("name", "HCV")
            .year("fiscal_year", 2024)
            .month("month", 12)
            .positive("amount", 0.01)
            .iso_date("as_of_date", "2024-03-31")
            .one_of("status", "pending", &["pending", "committed"])
            .finish();

        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_canonicalize_and_normalize_date() {
        let mut reserve_type = " single fund ".to_string();
        canonicalize(&mut reserve_type, &["HAP", "Admin", "Single Fund"]);
        assert_eq!(reserve_type, "Single Fund");

        let mut date = "3/31/2024".to_string();
        normalize_date_field(&mut date);
        assert_eq!(date, "2024-03-31");

        let mut bad = "someday".to_string();
        normalize_date_field(&mut bad);
        assert_eq!(bad, "someday");
    }

    #[test]
    fn test_join_errors() {
        let errors = vec![
            FieldError::new("month", "Must be between 1 and 12, got 0"),
            FieldError::new("program", "Required field is empty"),
        ];
        assert_eq!(
            join_errors(&errors),
            "month: Must be between 1 and 12, got 0; program: Required field is empty"
        );
    }
}
