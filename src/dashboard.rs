// 📊 Dashboard - budget and utilization figures for one fiscal year
//
// Everything is computed from the tables on demand; nothing is cached.

use crate::entities::hcv_utilization::percentage;
use crate::entities::validation::round2;
use anyhow::{Context, Result};
use chrono::Datelike;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub year: i32,

    // Budget authority
    pub hap_budget_authority: f64,
    pub admin_fee_authority: f64,
    pub authorized_vouchers: i64,

    // Spending
    pub ytd_hap_spent: f64,
    pub remaining_authority: f64,
    pub budget_utilization_rate: f64,
    pub months_reported: i64,

    /// Most recent month with utilization data
    pub latest_utilization: Option<LatestUtilization>,

    pub reserves: Vec<ReserveBalance>,
    pub total_reserves: f64,

    pub commitments: CommitmentTotals,
    pub record_counts: RecordCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestUtilization {
    pub month: i32,
    pub authorized_vouchers: i64,
    pub leased_vouchers: i64,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveBalance {
    pub reserve_type: String,
    pub as_of_date: String,
    pub ending_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitmentTotals {
    pub by_status: Vec<StatusTotal>,
    pub total_committed: f64,
    pub total_disbursed: f64,
    /// Committed minus disbursed, cancelled commitments excluded
    pub outstanding: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTotal {
    pub status: String,
    pub count: i64,
    pub amount: f64,
    pub disbursed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub budget_authorities: i64,
    pub mtw_reserves: i64,
    pub hap_expenditures: i64,
    pub commitments: i64,
    pub hcv_utilization: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPoint {
    pub month: u32,
    pub label: String,
    pub hap_spent: f64,
    pub units_leased: i64,
    pub leased_vouchers: i64,
    pub utilization_rate: f64,
}

// ============================================================================
// SUMMARY
// ============================================================================

pub fn summary(conn: &Connection, year: i32) -> Result<DashboardSummary> {
    // Amendments add dollars; the voucher baseline is the highest on record
    let (hap_budget_authority, admin_fee_authority, authorized_vouchers): (f64, f64, i64) = conn
        .query_row(
            "SELECT COALESCE(SUM(hap_budget_authority), 0),
                    COALESCE(SUM(admin_fee_authority), 0),
                    COALESCE(MAX(authorized_vouchers), 0)
             FROM budget_authorities WHERE fiscal_year = ?1",
            params![year],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .context("Failed to total budget authority")?;

    let (ytd_hap_spent, months_reported): (f64, i64) = conn
        .query_row(
            "SELECT COALESCE(SUM(hap_amount), 0), COUNT(DISTINCT month)
             FROM hap_expenditures WHERE year = ?1",
            params![year],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .context("Failed to total HAP expenditures")?;

    let latest_utilization = conn
        .query_row(
            "SELECT month, authorized_vouchers, leased_vouchers, utilization_rate
             FROM hcv_utilization WHERE year = ?1
             ORDER BY month DESC LIMIT 1",
            params![year],
            |row| {
                Ok(LatestUtilization {
                    month: row.get(0)?,
                    authorized_vouchers: row.get(1)?,
                    leased_vouchers: row.get(2)?,
                    utilization_rate: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to load latest utilization")?;

    let reserves = latest_reserves(conn, year)?;
    let total_reserves = round2(reserves.iter().map(|r| r.ending_balance).sum());

    Ok(DashboardSummary {
        year,
        hap_budget_authority: round2(hap_budget_authority),
        admin_fee_authority: round2(admin_fee_authority),
        authorized_vouchers,
        ytd_hap_spent: round2(ytd_hap_spent),
        remaining_authority: round2(hap_budget_authority - ytd_hap_spent),
        budget_utilization_rate: percentage(ytd_hap_spent, hap_budget_authority),
        months_reported,
        latest_utilization,
        reserves,
        total_reserves,
        commitments: commitment_totals(conn, year)?,
        record_counts: record_counts(conn, year)?,
    })
}

/// Latest balance per reserve type (by `as_of_date`, then newest row).
fn latest_reserves(conn: &Connection, year: i32) -> Result<Vec<ReserveBalance>> {
    let mut stmt = conn.prepare(
        "SELECT r.reserve_type, r.as_of_date, r.ending_balance
         FROM mtw_reserves r
         WHERE r.fiscal_year = ?1
           AND r.id = (
               SELECT r2.id FROM mtw_reserves r2
               WHERE r2.fiscal_year = r.fiscal_year AND r2.reserve_type = r.reserve_type
               ORDER BY r2.as_of_date DESC, r2.id DESC
               LIMIT 1
           )
         ORDER BY r.reserve_type",
    )?;

    let reserves = stmt
        .query_map(params![year], |row| {
            Ok(ReserveBalance {
                reserve_type: row.get(0)?,
                as_of_date: row.get(1)?,
                ending_balance: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load reserve balances")?;
    Ok(reserves)
}

fn commitment_totals(conn: &Connection, year: i32) -> Result<CommitmentTotals> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*), COALESCE(SUM(amount), 0), COALESCE(SUM(disbursed_amount), 0)
         FROM commitments WHERE fiscal_year = ?1
         GROUP BY status ORDER BY status",
    )?;
    let by_status = stmt
        .query_map(params![year], |row| {
            Ok(StatusTotal {
                status: row.get(0)?,
                count: row.get(1)?,
                amount: row.get(2)?,
                disbursed: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to total commitments")?;

    let live = by_status.iter().filter(|s| s.status != "cancelled");
    let total_committed: f64 = live.clone().map(|s| s.amount).sum();
    let total_disbursed: f64 = live.map(|s| s.disbursed).sum();

    Ok(CommitmentTotals {
        by_status,
        total_committed: round2(total_committed),
        total_disbursed: round2(total_disbursed),
        outstanding: round2(total_committed - total_disbursed),
    })
}

fn record_counts(conn: &Connection, year: i32) -> Result<RecordCounts> {
    let count = |table: &str, column: &str| -> Result<i64> {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column),
            params![year],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to count {}", table))
    };

    Ok(RecordCounts {
        budget_authorities: count("budget_authorities", "fiscal_year")?,
        mtw_reserves: count("mtw_reserves", "fiscal_year")?,
        hap_expenditures: count("hap_expenditures", "year")?,
        commitments: count("commitments", "fiscal_year")?,
        hcv_utilization: count("hcv_utilization", "year")?,
    })
}

// ============================================================================
// TREND
// ============================================================================

/// Twelve points, January to December. Months without data are zero.
pub fn monthly_trend(conn: &Connection, year: i32) -> Result<Vec<MonthlyPoint>> {
    let mut points: Vec<MonthlyPoint> = MONTH_LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| MonthlyPoint {
            month: i as u32 + 1,
            label: label.to_string(),
            hap_spent: 0.0,
            units_leased: 0,
            leased_vouchers: 0,
            utilization_rate: 0.0,
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT month, COALESCE(SUM(hap_amount), 0), COALESCE(SUM(units_leased), 0)
         FROM hap_expenditures WHERE year = ?1 GROUP BY month",
    )?;
    let spending = stmt
        .query_map(params![year], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load monthly HAP spending")?;

    for (month, spent, units) in spending {
        if let Some(point) = point_for(&mut points, month) {
            point.hap_spent = round2(spent);
            point.units_leased = units;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT month, leased_vouchers, utilization_rate
         FROM hcv_utilization WHERE year = ?1",
    )?;
    let utilization = stmt
        .query_map(params![year], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load monthly utilization")?;

    for (month, leased, rate) in utilization {
        if let Some(point) = point_for(&mut points, month) {
            point.leased_vouchers = leased;
            point.utilization_rate = rate;
        }
    }

    Ok(points)
}

fn point_for(points: &mut [MonthlyPoint], month: i64) -> Option<&mut MonthlyPoint> {
    usize::try_from(month - 1).ok().and_then(|i| points.get_mut(i))
}

// ============================================================================
// YEARS
// ============================================================================

/// Every year that appears in any table, newest first.
pub fn available_years(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare(
        "SELECT fiscal_year FROM budget_authorities
         UNION SELECT fiscal_year FROM mtw_reserves
         UNION SELECT year FROM hap_expenditures
         UNION SELECT fiscal_year FROM commitments
         UNION SELECT year FROM hcv_utilization
         ORDER BY 1 DESC",
    )?;
    let years = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i32>, _>>()
        .context("Failed to list years")?;
    Ok(years)
}

/// Year to show when none is requested: the newest year with data, else the
/// current calendar year.
pub fn default_year(conn: &Connection) -> Result<i32> {
    Ok(available_years(conn)?
        .first()
        .copied()
        .unwrap_or_else(|| chrono::Utc::now().year()))
}
