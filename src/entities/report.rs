// 📝 Report - saved output of the report generator

use super::repository::{Record, RecordMeta};
use super::validation::{FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub title: String,
    pub report_type: String,

    #[serde(default)]
    pub year: Option<i32>,

    pub content: String,

    /// Model that wrote the prose
    pub model: String,

    #[serde(default)]
    pub style_template_id: Option<i64>,
}

impl Report {
    /// Rough word count, shown in report listings
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

impl Record for Report {
    const TABLE: &'static str = "reports";
    const ENTITY: &'static str = "report";
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "report_type",
        "year",
        "content",
        "model",
        "style_template_id",
    ];
    const YEAR_COLUMN: Option<&'static str> = Some("year");
    const ORDER_BY: &'static str = "id DESC";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Report {
            meta: RecordMeta::from_row(row)?,
            title: row.get("title")?,
            report_type: row.get("report_type")?,
            year: row.get("year")?,
            content: row.get("content")?,
            model: row.get("model")?,
            style_template_id: row.get("style_template_id")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.title.clone().into(),
            self.report_type.clone().into(),
            self.year.into(),
            self.content.clone().into(),
            self.model.clone().into(),
            self.style_template_id.into(),
        ]
    }

    fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.content = self.content.trim().to_string();
    }

    fn validate(&self) -> Vec<FieldError> {
        Validator::new()
            .non_empty("title", &self.title)
            .non_empty("report_type", &self.report_type)
            .non_empty("content", &self.content)
            .finish()
    }
}
