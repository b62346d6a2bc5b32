// Prompt construction for report generation.

use super::ReportType;
use crate::dashboard::{DashboardSummary, MonthlyPoint};
use crate::entities::StyleTemplate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const ANALYST_ROLE: &str = "You are a financial analyst for a public housing authority's \
Housing Choice Voucher program. You write clear, accurate narrative reports for agency \
leadership, the board and HUD reviewers. Use only the figures provided and never invent \
numbers. Money is in US dollars; rates are percentages. Write plain text with short \
headed sections.";

/// Build the system and user prompts.
///
/// The system prompt carries the role and the active style template; the
/// user prompt carries the figures as compact JSON plus the report-type
/// guidance. Months with no activity are left out of the trend.
pub fn build_prompt(
    summary: &DashboardSummary,
    trend: &[MonthlyPoint],
    report_type: ReportType,
    template: Option<&StyleTemplate>,
    custom: Option<&str>,
) -> Prompt {
    let mut system = ANALYST_ROLE.to_string();
    if let Some(template) = template {
        system.push_str(&format!(
            "\n\nHouse style \"{}\" (tone: {}):\n{}",
            template.name,
            template.tone,
            template.instructions.trim()
        ));
    }

    let active_months: Vec<&MonthlyPoint> = trend
        .iter()
        .filter(|p| p.hap_spent != 0.0 || p.leased_vouchers != 0 || p.units_leased != 0)
        .collect();
    let data = serde_json::json!({
        "summary": summary,
        "monthly_trend": active_months,
    });

    let mut user = format!(
        "Report: {}\nFiscal year: {}\n\n{}\n",
        report_type.display_name(),
        summary.year,
        report_type.guidance()
    );
    if let Some(request) = custom {
        user.push_str(&format!("\nRequest: {}\n", request));
    }
    user.push_str(&format!("\nDashboard data (JSON):\n{}\n", data));

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(month: u32, hap_spent: f64) -> MonthlyPoint {
        MonthlyPoint {
            month,
            label: format!("M{}", month),
            hap_spent,
            units_leased: 0,
            leased_vouchers: 0,
            utilization_rate: 0.0,
        }
    }

    #[test]
    fn test_prompt_without_template() {
        let summary = DashboardSummary {
            year: 2024,
            hap_budget_authority: 12_000_000.0,
            ..Default::default()
        };
        let prompt = build_prompt(
            &summary,
            &[point(1, 950_000.0), point(2, 0.0)],
            ReportType::ExecutiveSummary,
            None,
            None,
        );

        assert_eq!(prompt.system, ANALYST_ROLE);
        assert!(prompt.user.starts_with("Report: Executive Summary\nFiscal year: 2024"));
        assert!(prompt.user.contains("\"hap_budget_authority\":12000000.0"));
        assert!(prompt.user.contains("\"label\":\"M1\""));
        assert!(!prompt.user.contains("\"label\":\"M2\""));
    }

    #[test]
    fn test_prompt_with_template_and_custom_request() {
        let mut template = StyleTemplate::new("Board Brief", "  Keep it under 300 words.  ");
        template.tone = "concise".to_string();

        let prompt = build_prompt(
            &DashboardSummary::default(),
            &[],
            ReportType::Custom,
            Some(&template),
            Some("Compare leasing to last year."),
        );

        assert!(prompt
            .system
            .ends_with("House style \"Board Brief\" (tone: concise):\nKeep it under 300 words."));
        assert!(prompt.user.contains("Request: Compare leasing to last year."));
    }
}
