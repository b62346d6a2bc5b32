// 🧾 HAP Expenditure - monthly housing assistance payments per program

use super::repository::{Record, RecordMeta};
use super::validation::{round2, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HapExpenditure {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub year: i32,
    pub month: i32,

    /// Voucher program: HCV, MTW, VASH, EHV, ...
    pub program: String,

    #[serde(default)]
    pub units_leased: i64,

    #[serde(default)]
    pub hap_amount: f64,

    /// Per-unit monthly cost. Recomputed on every save.
    #[serde(default)]
    pub average_hap_cost: f64,
}

impl HapExpenditure {
    pub fn new(year: i32, month: i32, program: &str, units_leased: i64, hap_amount: f64) -> Self {
        HapExpenditure {
            meta: RecordMeta::default(),
            year,
            month,
            program: program.to_string(),
            units_leased,
            hap_amount,
            average_hap_cost: 0.0,
        }
    }

    /// `YYYY-MM` label for charts and prompts
    pub fn period(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Per-unit cost; zero when nothing was leased.
pub fn average_cost(hap_amount: f64, units_leased: i64) -> f64 {
    if units_leased > 0 {
        round2(hap_amount / units_leased as f64)
    } else {
        0.0
    }
}

impl Record for HapExpenditure {
    const TABLE: &'static str = "hap_expenditures";
    const ENTITY: &'static str = "hap_expenditure";
    const COLUMNS: &'static [&'static str] = &[
        "year",
        "month",
        "program",
        "units_leased",
        "hap_amount",
        "average_hap_cost",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("year");
    const ORDER_BY: &'static str = "year DESC, month DESC, program, id";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HapExpenditure {
            meta: RecordMeta::from_row(row)?,
            year: row.get("year")?,
            month: row.get("month")?,
            program: row.get("program")?,
            units_leased: row.get("units_leased")?,
            hap_amount: row.get("hap_amount")?,
            average_hap_cost: row.get("average_hap_cost")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.year.into(),
            self.month.into(),
            self.program.clone().into(),
            self.units_leased.into(),
            self.hap_amount.into(),
            self.average_hap_cost.into(),
        ]
    }

    fn normalize(&mut self) {
        self.program = self.program.trim().to_uppercase();
        self.hap_amount = round2(self.hap_amount);
        self.average_hap_cost = average_cost(self.hap_amount, self.units_leased);
    }

    fn validate(&self) -> Vec<FieldError> {
        Validator::new()
            .year("year", self.year)
            .month("month", self.month)
            .non_empty("program", &self.program)
            .non_negative_count("units_leased", self.units_leased)
            .non_negative("hap_amount", self.hap_amount)
            .finish()
    }
}
