// 🏦 MTW Reserve - Moving to Work reserve balances
//
// Ending balance is derived: beginning + deposits - withdrawals. A client may
// send its own ending balance, but only when no flows were supplied.

use super::repository::{Record, RecordMeta};
use super::validation::{canonicalize, normalize_date_field, round2, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const RESERVE_TYPES: &[&str] = &["HAP", "Admin", "Single Fund"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtwReserve {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub fiscal_year: i32,

    /// One of `RESERVE_TYPES`
    pub reserve_type: String,

    pub as_of_date: String,

    #[serde(default)]
    pub beginning_balance: f64,

    #[serde(default)]
    pub deposits: f64,

    #[serde(default)]
    pub withdrawals: f64,

    #[serde(default)]
    pub ending_balance: f64,

    #[serde(default)]
    pub notes: Option<String>,
}

impl MtwReserve {
    pub fn new(fiscal_year: i32, reserve_type: &str, as_of_date: &str, beginning_balance: f64) -> Self {
        MtwReserve {
            meta: RecordMeta::default(),
            fiscal_year,
            reserve_type: reserve_type.to_string(),
            as_of_date: as_of_date.to_string(),
            beginning_balance,
            deposits: 0.0,
            withdrawals: 0.0,
            ending_balance: 0.0,
            notes: None,
        }
    }

    pub fn net_change(&self) -> f64 {
        self.deposits - self.withdrawals
    }

    fn has_flows(&self) -> bool {
        self.beginning_balance != 0.0 || self.deposits != 0.0 || self.withdrawals != 0.0
    }
}

impl Record for MtwReserve {
    const TABLE: &'static str = "mtw_reserves";
    const ENTITY: &'static str = "mtw_reserve";
    const COLUMNS: &'static [&'static str] = &[
        "fiscal_year",
        "reserve_type",
        "as_of_date",
        "beginning_balance",
        "deposits",
        "withdrawals",
        "ending_balance",
        "notes",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("fiscal_year");
    const ORDER_BY: &'static str = "as_of_date DESC, id DESC";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MtwReserve {
            meta: RecordMeta::from_row(row)?,
            fiscal_year: row.get("fiscal_year")?,
            reserve_type: row.get("reserve_type")?,
            as_of_date: row.get("as_of_date")?,
            beginning_balance: row.get("beginning_balance")?,
            deposits: row.get("deposits")?,
            withdrawals: row.get("withdrawals")?,
            ending_balance: row.get("ending_balance")?,
            notes: row.get("notes")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.fiscal_year.into(),
            self.reserve_type.clone().into(),
            self.as_of_date.clone().into(),
            self.beginning_balance.into(),
            self.deposits.into(),
            self.withdrawals.into(),
            self.ending_balance.into(),
            self.notes.clone().into(),
        ]
    }

    fn normalize(&mut self) {
        canonicalize(&mut self.reserve_type, RESERVE_TYPES);
        normalize_date_field(&mut self.as_of_date);
        self.beginning_balance = round2(self.beginning_balance);
        self.deposits = round2(self.deposits);
        self.withdrawals = round2(self.withdrawals);

        // A supplied ending balance is authoritative; derive it only when omitted
        if self.ending_balance == 0.0 && self.has_flows() {
            self.ending_balance = round2(self.beginning_balance + self.net_change());
        } else {
            self.ending_balance = round2(self.ending_balance);
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut v = Validator::new();
        v.year("fiscal_year", self.fiscal_year)
            .one_of("reserve_type", &self.reserve_type, RESERVE_TYPES)
            .iso_date("as_of_date", &self.as_of_date)
            .non_negative("deposits", self.deposits)
            .non_negative("withdrawals", self.withdrawals);

        if self.ending_balance < 0.0 {
            v.error(
                "ending_balance",
                format!(
                    "Withdrawals exceed available reserves (ending balance {:.2})",
                    self.ending_balance
                ),
            );
        }
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::repository::{self, RepoError};
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_ending_balance_is_derived() {
        let conn = test_conn();
        let mut reserve = MtwReserve::new(2024, "single fund", "2024-06-30", 1_000_000.0);
        reserve.deposits = 250_000.0;
        reserve.withdrawals = 400_000.0;

        let saved = repository::insert(&conn, reserve, "test").unwrap();

        assert_eq!(saved.reserve_type, "Single Fund");
        assert_eq!(saved.ending_balance, 850_000.0);
    }

    #[test]
    fn test_supplied_ending_balance_survives_create_and_update() {
        let conn = test_conn();
        let mut reserve = MtwReserve::new(2024, "Single Fund", "2024-06-30", 1_000.0);
        reserve.ending_balance = 1_250.0;

        let saved = repository::insert(&conn, reserve, "test").unwrap();
        assert_eq!(saved.ending_balance, 1_250.0);

        let id = saved.meta.id.unwrap();
        let updated = repository::update::<MtwReserve>(
            &conn,
            id,
            serde_json::json!({ "ending_balance": 1_400.0 }),
            "test",
        )
        .unwrap()
        .unwrap();
        assert_eq!(updated.ending_balance, 1_400.0);
        assert_eq!(
            repository::get::<MtwReserve>(&conn, id).unwrap().unwrap().ending_balance,
            1_400.0
        );
    }

    #[test]
    fn test_ending_balance_kept_without_flows() {
        let mut reserve = MtwReserve::new(2024, "HAP", "2024-06-30", 0.0);
        reserve.ending_balance = 3_210.556;
        reserve.normalize();

        assert_eq!(reserve.ending_balance, 3_210.56);
        assert!(reserve.validate().is_empty());
    }

    #[test]
    fn test_overdrawn_reserve_rejected() {
        let conn = test_conn();
        let mut reserve = MtwReserve::new(2024, "Admin", "2024-06-30", 100.0);
        reserve.withdrawals = 150.0;

        match repository::insert(&conn, reserve, "test") {
            Err(RepoError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "ending_balance");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_reserve_type_rejected() {
        let mut reserve = MtwReserve::new(2024, "Capital", "2024-06-30", 10.0);
        reserve.normalize();

        let errors = reserve.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "reserve_type");
    }

    #[test]
    fn test_update_recomputes_ending_balance() {
        let conn = test_conn();
        let saved = repository::insert(
            &conn,
            MtwReserve::new(2024, "HAP", "2024-06-30", 500.0),
            "test",
        )
        .unwrap();
        assert_eq!(saved.ending_balance, 500.0);

        let updated: MtwReserve = repository::update(
            &conn,
            saved.meta.id.unwrap(),
            serde_json::json!({"deposits": 125}),
            "test",
        )
        .unwrap()
        .unwrap();
        assert_eq!(updated.ending_balance, 625.0);
    }
}
