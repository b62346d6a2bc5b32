// 📈 HCV Utilization - monthly voucher and budget utilization
//
// utilization_rate        = leased ÷ authorized × 100
// budget_utilization_rate = HAP spent ÷ budget authority × 100
// Both are recomputed on every save; client values are ignored.

use super::repository::{Record, RecordMeta};
use super::validation::{round2, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HcvUtilization {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub year: i32,
    pub month: i32,

    pub authorized_vouchers: i64,

    #[serde(default)]
    pub leased_vouchers: i64,

    #[serde(default)]
    pub budget_authority: f64,

    #[serde(default)]
    pub hap_expenditure: f64,

    #[serde(default)]
    pub utilization_rate: f64,

    #[serde(default)]
    pub budget_utilization_rate: f64,
}

impl HcvUtilization {
    pub fn new(year: i32, month: i32, authorized_vouchers: i64, leased_vouchers: i64) -> Self {
        HcvUtilization {
            meta: RecordMeta::default(),
            year,
            month,
            authorized_vouchers,
            leased_vouchers,
            budget_authority: 0.0,
            hap_expenditure: 0.0,
            utilization_rate: 0.0,
            budget_utilization_rate: 0.0,
        }
    }
}

/// Percentage with two decimals; zero when the denominator is not positive.
pub fn percentage(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        round2(numerator / denominator * 100.0)
    } else {
        0.0
    }
}

/// Voucher utilization rate: leased vouchers ÷ authorized vouchers, as a percentage.
pub fn voucher_utilization_rate(leased: i64, authorized: i64) -> f64 {
    percentage(leased as f64, authorized as f64)
}

impl Record for HcvUtilization {
    const TABLE: &'static str = "hcv_utilization";
    const ENTITY: &'static str = "hcv_utilization";
    const COLUMNS: &'static [&'static str] = &[
        "year",
        "month",
        "authorized_vouchers",
        "leased_vouchers",
        "budget_authority",
        "hap_expenditure",
        "utilization_rate",
        "budget_utilization_rate",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("year");
    const ORDER_BY: &'static str = "year DESC, month DESC";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HcvUtilization {
            meta: RecordMeta::from_row(row)?,
            year: row.get("year")?,
            month: row.get("month")?,
            authorized_vouchers: row.get("authorized_vouchers")?,
            leased_vouchers: row.get("leased_vouchers")?,
            budget_authority: row.get("budget_authority")?,
            hap_expenditure: row.get("hap_expenditure")?,
            utilization_rate: row.get("utilization_rate")?,
            budget_utilization_rate: row.get("budget_utilization_rate")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.year.into(),
            self.month.into(),
            self.authorized_vouchers.into(),
            self.leased_vouchers.into(),
            self.budget_authority.into(),
            self.hap_expenditure.into(),
            self.utilization_rate.into(),
            self.budget_utilization_rate.into(),
        ]
    }

    fn normalize(&mut self) {
        self.budget_authority = round2(self.budget_authority);
        self.hap_expenditure = round2(self.hap_expenditure);
        self.utilization_rate =
            voucher_utilization_rate(self.leased_vouchers, self.authorized_vouchers);
        self.budget_utilization_rate = percentage(self.hap_expenditure, self.budget_authority);
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut v = Validator::new();
        v.year("year", self.year)
            .month("month", self.month)
            .non_negative_count("leased_vouchers", self.leased_vouchers)
            .non_negative("budget_authority", self.budget_authority)
            .non_negative("hap_expenditure", self.hap_expenditure);

        if self.authorized_vouchers <= 0 {
            v.error(
                "authorized_vouchers",
                format!("Must be greater than zero, got {}", self.authorized_vouchers),
            );
        }
        v.finish()
    }
}
