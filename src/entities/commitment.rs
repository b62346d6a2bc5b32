// 📌 Commitment - obligated funds not yet fully disbursed

use super::repository::{Record, RecordMeta};
use super::validation::{canonicalize, normalize_date_field, round2, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const COMMITMENT_STATUSES: &[&str] = &["pending", "committed", "disbursed", "cancelled"];

fn default_status() -> String {
    "pending".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub fiscal_year: i32,
    pub description: String,

    #[serde(default)]
    pub vendor: Option<String>,

    pub category: String,
    pub amount: f64,

    #[serde(default)]
    pub disbursed_amount: f64,

    pub committed_date: String,

    /// One of `COMMITMENT_STATUSES`
    #[serde(default = "default_status")]
    pub status: String,
}

impl Commitment {
    pub fn new(fiscal_year: i32, description: &str, category: &str, amount: f64, committed_date: &str) -> Self {
        Commitment {
            meta: RecordMeta::default(),
            fiscal_year,
            description: description.to_string(),
            vendor: None,
            category: category.to_string(),
            amount,
            disbursed_amount: 0.0,
            committed_date: committed_date.to_string(),
            status: default_status(),
        }
    }

    /// Amount still owed; cancelled commitments owe nothing.
    pub fn outstanding(&self) -> f64 {
        if self.status == "cancelled" {
            0.0
        } else {
            round2((self.amount - self.disbursed_amount).max(0.0))
        }
    }
}

impl Record for Commitment {
    const TABLE: &'static str = "commitments";
    const ENTITY: &'static str = "commitment";
    const COLUMNS: &'static [&'static str] = &[
        "fiscal_year",
        "description",
        "vendor",
        "category",
        "amount",
        "disbursed_amount",
        "committed_date",
        "status",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("fiscal_year");
    const ORDER_BY: &'static str = "committed_date DESC, id DESC";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Commitment {
            meta: RecordMeta::from_row(row)?,
            fiscal_year: row.get("fiscal_year")?,
            description: row.get("description")?,
            vendor: row.get("vendor")?,
            category: row.get("category")?,
            amount: row.get("amount")?,
            disbursed_amount: row.get("disbursed_amount")?,
            committed_date: row.get("committed_date")?,
            status: row.get("status")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.fiscal_year.into(),
            self.description.clone().into(),
            self.vendor.clone().into(),
            self.category.clone().into(),
            self.amount.into(),
            self.disbursed_amount.into(),
            self.committed_date.clone().into(),
            self.status.clone().into(),
        ]
    }

    fn normalize(&mut self) {
        self.description = self.description.trim().to_string();
        self.category = self.category.trim().to_string();
        if self.vendor.as_deref().is_some_and(|v| v.trim().is_empty()) {
            self.vendor = None;
        }
        canonicalize(&mut self.status, COMMITMENT_STATUSES);
        normalize_date_field(&mut self.committed_date);
        self.amount = round2(self.amount);
        self.disbursed_amount = round2(self.disbursed_amount);
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut v = Validator::new();
        v.year("fiscal_year", self.fiscal_year)
            .non_empty("description", &self.description)
            .non_empty("category", &self.category)
            .positive("amount", self.amount)
            .non_negative("disbursed_amount", self.disbursed_amount)
            .iso_date("committed_date", &self.committed_date)
            .one_of("status", &self.status, COMMITMENT_STATUSES);

        if self.disbursed_amount > self.amount {
            v.error(
                "disbursed_amount",
                format!(
                    "Cannot exceed the committed amount ({:.2} > {:.2})",
                    self.disbursed_amount, self.amount
                ),
            );
        }
        v.finish()
    }
}
