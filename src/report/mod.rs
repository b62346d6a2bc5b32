// 📝 Report Generator - narrative reports written from dashboard figures
//
// Generation is split in two so the database lock is never held while the
// model is writing:
//   prepare_report()  gathers figures + style template and builds the prompt
//   save_report()     stores the finished text once the stream completes

pub mod pdf;
pub mod prompt;

#[cfg(feature = "server")]
pub mod llm;

use crate::dashboard;
use crate::entities::repository::{self, ListQuery, RepoError};
use crate::entities::style_template;
use crate::entities::Report;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub use pdf::{export_pdf, render_pdf};
pub use prompt::{build_prompt, Prompt};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("custom reports need a custom_prompt")]
    MissingCustomPrompt,

    #[error("unknown report type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ExecutiveSummary,
    Utilization,
    Reserves,
    Commitments,
    Custom,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        ReportType::ExecutiveSummary,
        ReportType::Utilization,
        ReportType::Reserves,
        ReportType::Commitments,
        ReportType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ExecutiveSummary => "executive_summary",
            ReportType::Utilization => "utilization",
            ReportType::Reserves => "reserves",
            ReportType::Commitments => "commitments",
            ReportType::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ReportType::ExecutiveSummary => "Executive Summary",
            ReportType::Utilization => "Voucher Utilization Report",
            ReportType::Reserves => "MTW Reserves Report",
            ReportType::Commitments => "Commitments Report",
            ReportType::Custom => "Custom Report",
        }
    }

    /// What the model is asked to cover for this report type
    pub fn guidance(&self) -> &'static str {
        match self {
            ReportType::ExecutiveSummary => {
                "Write a one-page executive summary for the board. Cover budget authority \
                 versus year-to-date HAP spending, the current voucher utilization rate, \
                 reserve levels and outstanding commitments. End with two or three risks \
                 or recommendations."
            }
            ReportType::Utilization => {
                "Analyze voucher utilization month by month. Note the trend in leased \
                 vouchers, the gap to authorized vouchers, and whether HAP spending is on \
                 pace with budget authority for the months reported."
            }
            ReportType::Reserves => {
                "Describe MTW reserve balances by reserve type as of the latest date, \
                 how they relate to annual budget authority, and any concern about \
                 drawing reserves down."
            }
            ReportType::Commitments => {
                "Summarize commitments by status, the amount disbursed so far and the \
                 outstanding balance. Call out anything cancelled or largely undisbursed."
            }
            ReportType::Custom => "Answer the request below using the figures provided.",
        }
    }
}

impl FromStr for ReportType {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| ReportError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// GENERATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub report_type: ReportType,

    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub custom_prompt: Option<String>,
}

/// Everything needed to call the model and then save the result.
#[derive(Debug, Clone)]
pub struct PreparedReport {
    pub title: String,
    pub report_type: ReportType,
    pub year: i32,
    pub prompt: Prompt,
    pub style_template_id: Option<i64>,
}

pub fn prepare_report(conn: &Connection, request: &GenerateRequest) -> Result<PreparedReport, ReportError> {
    let custom = request
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if request.report_type == ReportType::Custom && custom.is_none() {
        return Err(ReportError::MissingCustomPrompt);
    }

    let year = match request.year {
        Some(year) => year,
        None => dashboard::default_year(conn)?,
    };
    let summary = dashboard::summary(conn, year)?;
    let trend = dashboard::monthly_trend(conn, year)?;
    let template = style_template::get_active(conn).map_err(RepoError::from)?;

    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} FY{}", request.report_type.display_name(), year));

    Ok(PreparedReport {
        title,
        report_type: request.report_type,
        year,
        prompt: build_prompt(&summary, &trend, request.report_type, template.as_ref(), custom),
        style_template_id: template.and_then(|t| t.meta.id),
    })
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn save_report(
    conn: &Connection,
    prepared: &PreparedReport,
    content: &str,
    model: &str,
    actor: &str,
) -> Result<Report, RepoError> {
    let report = Report {
        meta: Default::default(),
        title: prepared.title.clone(),
        report_type: prepared.report_type.as_str().to_string(),
        year: Some(prepared.year),
        content: content.to_string(),
        model: model.to_string(),
        style_template_id: prepared.style_template_id,
    };
    let saved = repository::insert(conn, report, actor)?;

    tracing::info!(
        report_id = ?saved.meta.id,
        report_type = prepared.report_type.as_str(),
        words = saved.word_count(),
        "report saved"
    );
    Ok(saved)
}

pub fn get_report(conn: &Connection, id: i64) -> Result<Option<Report>, RepoError> {
    repository::get(conn, id)
}

pub fn list_reports(conn: &Connection, query: &ListQuery) -> Result<Vec<Report>, RepoError> {
    repository::list(conn, query)
}

pub fn delete_report(conn: &Connection, id: i64, actor: &str) -> Result<bool, RepoError> {
    repository::delete::<Report>(conn, id, actor)
}
