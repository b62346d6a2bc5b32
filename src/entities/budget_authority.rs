// 💵 Budget Authority - HUD's annual HAP and admin fee allocation

use super::repository::{Record, RecordMeta};
use super::validation::{normalize_date_field, round2, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAuthority {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub fiscal_year: i32,

    /// HAP dollars HUD authorized for the year
    pub hap_budget_authority: f64,

    #[serde(default)]
    pub admin_fee_authority: f64,

    /// Vouchers the authority is funded to lease (ACC units)
    #[serde(default)]
    pub authorized_vouchers: i64,

    pub effective_date: String,

    #[serde(default)]
    pub notes: Option<String>,
}

impl BudgetAuthority {
    pub fn new(fiscal_year: i32, hap_budget_authority: f64, effective_date: &str) -> Self {
        BudgetAuthority {
            meta: RecordMeta::default(),
            fiscal_year,
            hap_budget_authority,
            admin_fee_authority: 0.0,
            authorized_vouchers: 0,
            effective_date: effective_date.to_string(),
            notes: None,
        }
    }

    /// Total authority across HAP and administrative fees
    pub fn total_authority(&self) -> f64 {
        self.hap_budget_authority + self.admin_fee_authority
    }
}

impl Record for BudgetAuthority {
    const TABLE: &'static str = "budget_authorities";
    const ENTITY: &'static str = "budget_authority";
    const COLUMNS: &'static [&'static str] = &[
        "fiscal_year",
        "hap_budget_authority",
        "admin_fee_authority",
        "authorized_vouchers",
        "effective_date",
        "notes",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("fiscal_year");
    const ORDER_BY: &'static str = "fiscal_year DESC, effective_date DESC, id DESC";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(BudgetAuthority {
            meta: RecordMeta::from_row(row)?,
            fiscal_year: row.get("fiscal_year")?,
            hap_budget_authority: row.get("hap_budget_authority")?,
            admin_fee_authority: row.get("admin_fee_authority")?,
            authorized_vouchers: row.get("authorized_vouchers")?,
            effective_date: row.get("effective_date")?,
            notes: row.get("notes")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.fiscal_year.into(),
            self.hap_budget_authority.into(),
            self.admin_fee_authority.into(),
            self.authorized_vouchers.into(),
            self.effective_date.clone().into(),
            self.notes.clone().into(),
        ]
    }

    fn normalize(&mut self) {
        normalize_date_field(&mut self.effective_date);
        self.hap_budget_authority = round2(self.hap_budget_authority);
        self.admin_fee_authority = round2(self.admin_fee_authority);
        if self.notes.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.notes = None;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Validator::new()
            .year("fiscal_year", self.fiscal_year)
            .non_negative("hap_budget_authority", self.hap_budget_authority)
            .non_negative("admin_fee_authority", self.admin_fee_authority)
            .non_negative_count("authorized_vouchers", self.authorized_vouchers)
            .iso_date("effective_date", &self.effective_date)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::repository::{self, ListQuery, RepoError};
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_normalizes_date() {
        let conn = test_conn();
        let mut ba = BudgetAuthority::new(2024, 12_500_000.456, "01/01/2024");
        ba.authorized_vouchers = 1_150;

        let saved = repository::insert(&conn, ba, "test").unwrap();

        assert!(saved.meta.id.is_some());
        assert_eq!(saved.effective_date, "2024-01-01");
        assert_eq!(saved.hap_budget_authority, 12_500_000.46);

        let loaded: BudgetAuthority = repository::get(&conn, saved.meta.id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_validation_rejects_bad_year_and_amount() {
        let conn = test_conn();
        let ba = BudgetAuthority::new(1999, -5.0, "not a date");

        match repository::insert(&conn, ba, "test") {
            Err(RepoError::Validation(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec!["fiscal_year", "hap_budget_authority", "effective_date"]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(repository::count::<BudgetAuthority>(&conn).unwrap(), 0);
    }

    #[test]
    fn test_list_filters_by_fiscal_year() {
        let conn = test_conn();
        for year in [2023, 2024, 2024] {
            repository::insert(&conn, BudgetAuthority::new(year, 100.0, "2024-01-01"), "test")
                .unwrap();
        }

        let query = ListQuery {
            year: Some(2024),
            ..Default::default()
        };
        let rows: Vec<BudgetAuthority> = repository::list(&conn, &query).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.fiscal_year == 2024));

        let all: Vec<BudgetAuthority> = repository::list(&conn, &ListQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_update_merges_patch() {
        let conn = test_conn();
        let saved = repository::insert(
            &conn,
            BudgetAuthority::new(2024, 100.0, "2024-01-01"),
            "test",
        )
        .unwrap();
        let id = saved.meta.id.unwrap();

        let updated: BudgetAuthority = repository::update(
            &conn,
            id,
            serde_json::json!({"admin_fee_authority": 25.5, "notes": "Revised award letter"}),
            "test",
        )
        .unwrap()
        .unwrap();

        assert_eq!(updated.hap_budget_authority, 100.0);
        assert_eq!(updated.admin_fee_authority, 25.5);
        assert_eq!(updated.notes.as_deref(), Some("Revised award letter"));
        assert_eq!(updated.total_authority(), 125.5);
        assert_eq!(updated.meta.created_at, saved.meta.created_at);

        let missing: Option<BudgetAuthority> =
            repository::update(&conn, 9_999, serde_json::json!({}), "test").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_update_revalidates() {
        let conn = test_conn();
        let saved = repository::insert(
            &conn,
            BudgetAuthority::new(2024, 100.0, "2024-01-01"),
            "test",
        )
        .unwrap();

        let result = repository::update::<BudgetAuthority>(
            &conn,
            saved.meta.id.unwrap(),
            serde_json::json!({"hap_budget_authority": -1}),
            "test",
        );
        assert!(matches!(result, Err(RepoError::Validation(_))));
    }

    #[test]
    fn test_delete_logs_event() {
        let conn = test_conn();
        let saved = repository::insert(
            &conn,
            BudgetAuthority::new(2024, 100.0, "2024-01-01"),
            "tester",
        )
        .unwrap();
        let id = saved.meta.id.unwrap();

        assert!(repository::delete::<BudgetAuthority>(&conn, id, "tester").unwrap());
        assert!(!repository::delete::<BudgetAuthority>(&conn, id, "tester").unwrap());

        let events =
            crate::db::get_events_for_entity(&conn, "budget_authority", &id.to_string()).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"budget_authority_created"));
        assert!(types.contains(&"budget_authority_deleted"));
    }
}
