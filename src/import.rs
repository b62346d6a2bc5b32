// 📥 Import Pipeline - CSV / Excel ingestion with tolerant column matching
//
// Finance staff export the same numbers from five different systems, each
// with its own header spelling. The importer:
//   1. detects the file format from the file name
//   2. reads the first sheet into a header + rows table
//   3. matches headers to entity fields (exact → alias → fuzzy)
//   4. coerces each cell (money, dates with fallbacks, months, fiscal years)
//   5. validates every row and inserts the good ones in one transaction

use crate::coerce;
use crate::db::{compute_file_hash, find_import_batch, insert_event, insert_import_batch, Event};
use crate::entities::repository::{self, Record, RepoError};
use crate::entities::{BudgetAuthority, Commitment, HapExpenditure, HcvUtilization, MtwReserve};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file type: {0} (expected .csv, .xlsx, .xls or .ods)")]
    UnsupportedFormat(String),

    #[error("unknown import target: {0}")]
    UnknownTarget(String),

    #[error("could not read file: {0}")]
    Read(String),

    #[error("file has no header row")]
    EmptyFile,

    #[error("missing required columns: {}", .missing.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("{file_name} was already imported as batch {batch_id} on {imported_at}")]
    Duplicate {
        file_name: String,
        batch_id: i64,
        imported_at: String,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<anyhow::Error> for ImportError {
    fn from(err: anyhow::Error) -> Self {
        ImportError::Repo(err.into())
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repo(err.into())
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Excel,
}

/// Detect the file format from its extension.
pub fn detect_format(file_name: &str) -> Result<FileFormat, ImportError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" | "txt" => Ok(FileFormat::Csv),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(FileFormat::Excel),
        _ => Err(ImportError::UnsupportedFormat(file_name.to_string())),
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// First sheet of a file: the header row plus data rows with their
/// spreadsheet line numbers (1-based).
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<(usize, Vec<String>)>,
}

pub fn read_table(bytes: &[u8], format: FileFormat) -> Result<Table, ImportError> {
    let lines = match format {
        FileFormat::Csv => read_csv_lines(bytes)?,
        FileFormat::Excel => read_excel_lines(bytes)?,
    };
    split_header(lines)
}

fn read_csv_lines(bytes: &[u8]) -> Result<Vec<(usize, Vec<String>)>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut lines = Vec::new();
    for (index, result) in reader.byte_records().enumerate() {
        let record = result.map_err(|e| ImportError::Read(format!("CSV line {}: {}", index + 1, e)))?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 1);

        // Lossy: Windows-1252 exports are common and only break the odd accent
        let cells = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).trim().to_string())
            .collect();
        lines.push((line, cells));
    }
    Ok(lines)
}

fn read_excel_lines(bytes: &[u8]) -> Result<Vec<(usize, Vec<String>)>, ImportError> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut workbook =
        open_workbook_auto_from_rs(cursor).map_err(|e| ImportError::Read(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::EmptyFile)?
        .map_err(|e| ImportError::Read(e.to_string()))?;

    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let lines = range
        .rows()
        .enumerate()
        .map(|(i, row)| (first_row + i + 1, row.iter().map(cell_to_string).collect()))
        .collect();
    Ok(lines)
}

/// Render an Excel cell the way the same value would look in a CSV export.
#[allow(unreachable_patterns)]
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            coerce::excel_serial_to_date(serial)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| serial.to_string())
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
        _ => String::new(),
    }
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

/// The header is the first row with at least two filled cells, which skips
/// report titles above the table. Single-column files fall back to the first
/// non-blank row.
fn split_header(lines: Vec<(usize, Vec<String>)>) -> Result<Table, ImportError> {
    let filled = |cells: &[String]| cells.iter().filter(|c| !c.trim().is_empty()).count();

    let header_index = lines
        .iter()
        .position(|(_, cells)| filled(cells) >= 2)
        .or_else(|| lines.iter().position(|(_, cells)| !is_blank(cells)))
        .ok_or(ImportError::EmptyFile)?;

    let mut lines = lines.into_iter().skip(header_index);
    let (_, header_cells) = lines.next().ok_or(ImportError::EmptyFile)?;
    let headers = header_cells
        .into_iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    Ok(Table {
        headers,
        rows: lines.collect(),
    })
}

// ============================================================================
// FIELD REGISTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Money,
    Integer,
    Date,
    Year,
    Month,
    /// A date or month label that fills `year` and `month`
    Period,
}

/// One importable field: its canonical name, how to read it, and the other
/// names finance staff use for it.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub aliases: Vec<&'static str>,

    /// Another field whose value can stand in when this column is absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivable_from: Option<&'static str>,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldSpec {
            name,
            kind,
            required: false,
            aliases: Vec::new(),
            derivable_from: None,
        }
    }

    /// Builder: mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: add alternative header names
    pub fn aliases(mut self, aliases: &[&'static str]) -> Self {
        self.aliases.extend_from_slice(aliases);
        self
    }

    /// Builder: allow another matched column to satisfy this one
    pub fn derivable_from(mut self, field: &'static str) -> Self {
        self.derivable_from = Some(field);
        self
    }

    fn candidates(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldRegistry {
    pub fields: Vec<FieldSpec>,
}

impl FieldRegistry {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// IMPORT TARGETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportTarget {
    BudgetAuthority,
    MtwReserve,
    HapExpenditure,
    Commitment,
    HcvUtilization,
}

impl ImportTarget {
    pub const ALL: [ImportTarget; 5] = [
        ImportTarget::BudgetAuthority,
        ImportTarget::MtwReserve,
        ImportTarget::HapExpenditure,
        ImportTarget::Commitment,
        ImportTarget::HcvUtilization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportTarget::BudgetAuthority => "budget_authority",
            ImportTarget::MtwReserve => "mtw_reserve",
            ImportTarget::HapExpenditure => "hap_expenditure",
            ImportTarget::Commitment => "commitment",
            ImportTarget::HcvUtilization => "hcv_utilization",
        }
    }

    /// Field registry for this target
    pub fn registry(&self) -> FieldRegistry {
        use FieldKind::*;

        let fields = match self {
            ImportTarget::BudgetAuthority => vec![
                fiscal_year_field(),
                FieldSpec::new("hap_budget_authority", Money).required().aliases(&[
                    "hap ba",
                    "budget authority",
                    "hap authority",
                    "hap funding",
                    "ba amount",
                    "annual budget authority",
                ]),
                FieldSpec::new("admin_fee_authority", Money).aliases(&[
                    "admin fee",
                    "admin fees",
                    "administrative fee authority",
                    "af authority",
                ]),
                FieldSpec::new("authorized_vouchers", Integer).aliases(&[
                    "acc units",
                    "authorized units",
                    "baseline vouchers",
                    "vouchers authorized",
                    "units authorized",
                ]),
                FieldSpec::new("effective_date", Date).required().aliases(&[
                    "effective",
                    "effective dt",
                    "award date",
                    "start date",
                    "date",
                ]),
                notes_field(),
            ],
            ImportTarget::MtwReserve => vec![
                fiscal_year_field(),
                FieldSpec::new("reserve_type", Text).required().aliases(&[
                    "type",
                    "reserve",
                    "fund",
                    "reserve category",
                ]),
                FieldSpec::new("as_of_date", Date).required().aliases(&[
                    "as of",
                    "date",
                    "balance date",
                    "period end",
                    "month end",
                ]),
                FieldSpec::new("beginning_balance", Money).aliases(&[
                    "beginning",
                    "opening balance",
                    "start balance",
                    "beg bal",
                    "prior balance",
                ]),
                FieldSpec::new("deposits", Money).aliases(&[
                    "additions",
                    "deposit",
                    "inflows",
                    "increases",
                    "contributions",
                ]),
                FieldSpec::new("withdrawals", Money).aliases(&[
                    "uses",
                    "withdrawal",
                    "outflows",
                    "decreases",
                    "draws",
                ]),
                FieldSpec::new("ending_balance", Money).aliases(&[
                    "ending",
                    "closing balance",
                    "balance",
                    "end bal",
                    "current balance",
                ]),
                notes_field(),
            ],
            ImportTarget::HapExpenditure => vec![
                year_field(),
                month_field(),
                period_field(),
                FieldSpec::new("program", Text).required().aliases(&[
                    "voucher program",
                    "program type",
                    "voucher type",
                    "program name",
                ]),
                FieldSpec::new("units_leased", Integer).aliases(&[
                    "units",
                    "leased",
                    "leased units",
                    "unit months leased",
                    "umls",
                    "vouchers leased",
                    "families served",
                ]),
                FieldSpec::new("hap_amount", Money).required().aliases(&[
                    "hap",
                    "hap expense",
                    "hap expenditure",
                    "hap paid",
                    "total hap",
                    "amount",
                    "payments",
                ]),
            ],
            ImportTarget::Commitment => vec![
                fiscal_year_field(),
                FieldSpec::new("description", Text).required().aliases(&[
                    "desc",
                    "item",
                    "purpose",
                    "commitment",
                    "details",
                ]),
                FieldSpec::new("vendor", Text).aliases(&[
                    "payee",
                    "contractor",
                    "supplier",
                ]),
                FieldSpec::new("category", Text).required().aliases(&[
                    "type",
                    "cost category",
                    "budget line",
                    "line item",
                ]),
                FieldSpec::new("amount", Money).required().aliases(&[
                    "commitment amount",
                    "committed amount",
                    "total",
                    "obligated",
                    "obligation",
                ]),
                FieldSpec::new("disbursed_amount", Money).aliases(&[
                    "disbursed",
                    "paid",
                    "spent",
                    "expended",
                    "paid to date",
                ]),
                FieldSpec::new("committed_date", Date).required().aliases(&[
                    "date",
                    "commit date",
                    "obligation date",
                    "approved date",
                ]),
                FieldSpec::new("status", Text).aliases(&["state", "commitment status"]),
            ],
            ImportTarget::HcvUtilization => vec![
                year_field(),
                month_field(),
                period_field(),
                FieldSpec::new("authorized_vouchers", Integer).required().aliases(&[
                    "authorized",
                    "acc units",
                    "baseline",
                    "vouchers authorized",
                    "total vouchers",
                ]),
                FieldSpec::new("leased_vouchers", Integer).required().aliases(&[
                    "leased",
                    "leased units",
                    "vouchers leased",
                    "units leased",
                    "utilized",
                ]),
                FieldSpec::new("budget_authority", Money).aliases(&[
                    "ba",
                    "monthly budget",
                    "budget",
                ]),
                FieldSpec::new("hap_expenditure", Money).aliases(&[
                    "hap",
                    "hap spent",
                    "hap expense",
                    "hap paid",
                    "expenditures",
                ]),
            ],
        };

        FieldRegistry { fields }
    }
}

impl FromStr for ImportTarget {
    type Err = ImportError;

    /// Accepts snake_case, kebab-case and plural forms ("hap-expenditures").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        let key = key.strip_suffix('s').unwrap_or(&key);
        let key = match key {
            "budget_authoritie" => "budget_authority",
            other => other,
        };

        ImportTarget::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| ImportError::UnknownTarget(s.to_string()))
    }
}

impl std::fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn fiscal_year_field() -> FieldSpec {
    FieldSpec::new("fiscal_year", FieldKind::Year)
        .required()
        .aliases(&["fy", "fiscal yr", "year", "budget year", "funding year"])
}

fn year_field() -> FieldSpec {
    FieldSpec::new("year", FieldKind::Year)
        .required()
        .aliases(&["yr", "calendar year", "cy", "fiscal year", "fy"])
        .derivable_from("period")
}

fn month_field() -> FieldSpec {
    FieldSpec::new("month", FieldKind::Month)
        .required()
        .aliases(&["mo", "mon", "month name"])
        .derivable_from("period")
}

fn period_field() -> FieldSpec {
    FieldSpec::new("period", FieldKind::Period).aliases(&[
        "reporting period",
        "month ending",
        "period ending",
        "date",
        "as of",
        "service month",
    ])
}

fn notes_field() -> FieldSpec {
    FieldSpec::new("notes", FieldKind::Text).aliases(&["note", "comments", "memo", "remarks"])
}

// ============================================================================
// COLUMN MATCHING
// ============================================================================

/// Minimum similarity for a fuzzy header match
pub const FUZZY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Alias,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub field: String,
    pub header: String,
    pub column: usize,
    pub method: MatchMethod,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub matches: Vec<ColumnMatch>,
    pub unmatched_headers: Vec<String>,
    pub missing_required: Vec<String>,
}

impl ColumnMapping {
    pub fn column_for(&self, field: &str) -> Option<usize> {
        self.matches.iter().find(|m| m.field == field).map(|m| m.column)
    }
}

/// Match headers to registry fields.
///
/// Passes run in order and each header is claimed at most once:
/// 1. normalized header equals the normalized field name
/// 2. normalized header equals a normalized alias
/// 3. best similarity across name and aliases, if >= `FUZZY_THRESHOLD`
pub fn match_columns(headers: &[String], registry: &FieldRegistry) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| coerce::normalize_header(h)).collect();
    let mut used: HashSet<usize> = HashSet::new();
    let mut matches: Vec<ColumnMatch> = Vec::new();

    let is_matched = |matches: &[ColumnMatch], field: &str| matches.iter().any(|m| m.field == field);
    let claim = |matches: &mut Vec<ColumnMatch>, field: &FieldSpec, column: usize, method, score| {
        matches.push(ColumnMatch {
            field: field.name.to_string(),
            header: headers[column].clone(),
            column,
            method,
            score,
        });
    };

    // Pass 1: exact field name
    for field in &registry.fields {
        let target = coerce::normalize_header(field.name);
        if let Some(column) = (0..headers.len()).find(|c| !used.contains(c) && normalized[*c] == target) {
            used.insert(column);
            claim(&mut matches, field, column, MatchMethod::Exact, 1.0);
        }
    }

    // Pass 2: exact alias
    for field in &registry.fields {
        if is_matched(&matches, field.name) {
            continue;
        }
        let aliases: Vec<String> = field.aliases.iter().map(|a| coerce::normalize_header(a)).collect();
        if let Some(column) = (0..headers.len())
            .find(|c| !used.contains(c) && !normalized[*c].is_empty() && aliases.contains(&normalized[*c]))
        {
            used.insert(column);
            claim(&mut matches, field, column, MatchMethod::Alias, 1.0);
        }
    }

    // Pass 3: fuzzy, best pairs first
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (field_index, field) in registry.fields.iter().enumerate() {
        if is_matched(&matches, field.name) {
            continue;
        }
        for (column, header) in headers.iter().enumerate() {
            if used.contains(&column) || normalized[column].is_empty() {
                continue;
            }
            let score = field
                .candidates()
                .map(|candidate| similarity(header, candidate))
                .fold(0.0, f64::max);
            if score >= FUZZY_THRESHOLD {
                candidates.push((score, field_index, column));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut fuzzy_fields: HashSet<usize> = HashSet::new();
    for (score, field_index, column) in candidates {
        if used.contains(&column) || fuzzy_fields.contains(&field_index) {
            continue;
        }
        used.insert(column);
        fuzzy_fields.insert(field_index);
        let rounded = (score * 100.0).round() / 100.0;
        claim(&mut matches, &registry.fields[field_index], column, MatchMethod::Fuzzy, rounded);
    }

    let unmatched_headers = headers
        .iter()
        .enumerate()
        .filter(|(c, h)| !used.contains(c) && !h.trim().is_empty())
        .map(|(_, h)| h.clone())
        .collect();

    let missing_required = registry
        .fields
        .iter()
        .filter(|f| f.required && !is_matched(&matches, f.name))
        .filter(|f| !f.derivable_from.is_some_and(|source| is_matched(&matches, source)))
        .map(|f| f.name.to_string())
        .collect();

    ColumnMapping {
        matches,
        unmatched_headers,
        missing_required,
    }
}

/// Similarity between a raw header and a field name / alias, 0.0..=1.0.
///
/// Token containment scores high ("Admin Fees Awarded" contains "admin fees");
/// otherwise falls back to bigram Dice similarity of the normalized strings.
pub fn similarity(header: &str, candidate: &str) -> f64 {
    let header_tokens = coerce::header_tokens(header);
    let candidate_tokens = coerce::header_tokens(candidate);
    if header_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }

    let mut score = dice(&coerce::normalize_header(header), &coerce::normalize_header(candidate));

    let h_len = header_tokens.len() as f64;
    let c_len = candidate_tokens.len() as f64;
    if candidate_tokens.iter().all(|t| header_tokens.contains(t)) {
        score = score.max(0.8 + 0.2 * (c_len / h_len));
    } else if header_tokens.iter().all(|t| candidate_tokens.contains(t)) {
        score = score.max(0.6 + 0.2 * (h_len / c_len));
    }

    score.min(1.0)
}

/// Sørensen–Dice coefficient over character bigrams.
fn dice(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let a_grams = bigrams(a);
    let mut b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return if a == b && !a.is_empty() { 1.0 } else { 0.0 };
    }

    let total = (a_grams.len() + b_grams.len()) as f64;
    let mut common = 0usize;
    for gram in &a_grams {
        if let Some(pos) = b_grams.iter().position(|g| g == gram) {
            b_grams.swap_remove(pos);
            common += 1;
        }
    }
    2.0 * common as f64 / total
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

/// Coerce one cell. `Ok(None)` means empty.
fn coerce_cell(kind: FieldKind, raw: &str) -> Result<Option<Value>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let value = match kind {
        FieldKind::Text => Some(Value::from(raw)),
        FieldKind::Money => coerce::parse_amount(raw).map(Value::from),
        FieldKind::Integer => coerce::parse_integer(raw).map(Value::from),
        FieldKind::Date => coerce::normalize_date(raw).map(Value::from),
        FieldKind::Year => coerce::parse_year(raw).map(Value::from),
        FieldKind::Month => coerce::parse_month(raw).map(Value::from),
        FieldKind::Period => coerce::parse_period(raw)
            .map(|(year, month)| serde_json::json!({ "year": year, "month": month })),
    };

    value.map(Some).ok_or_else(|| {
        let expected = match kind {
            FieldKind::Text => "text",
            FieldKind::Money => "an amount",
            FieldKind::Integer => "a whole number",
            FieldKind::Date => "a date",
            FieldKind::Year => "a year",
            FieldKind::Month => "a month",
            FieldKind::Period => "a period",
        };
        format!("cannot read '{}' as {}", raw, expected)
    })
}

/// Build the JSON object for one row. Errors are per-cell messages.
fn row_to_object(
    cells: &[String],
    mapping: &ColumnMapping,
    registry: &FieldRegistry,
) -> Result<Map<String, Value>, Vec<String>> {
    let mut object = Map::new();
    let mut errors = Vec::new();
    let mut period: Option<Value> = None;

    for m in &mapping.matches {
        let Some(spec) = registry.get(&m.field) else {
            continue;
        };
        let raw = cells.get(m.column).map(String::as_str).unwrap_or("");

        match coerce_cell(spec.kind, raw) {
            Ok(Some(value)) if spec.kind == FieldKind::Period => period = Some(value),
            Ok(Some(value)) => {
                object.insert(spec.name.to_string(), value);
            }
            Ok(None) => {}
            Err(message) => errors.push(format!("{} (column '{}'): {}", spec.name, m.header, message)),
        }
    }

    // Period fills in only what the dedicated columns left empty
    if let Some(Value::Object(parts)) = period {
        for (key, value) in parts {
            object.entry(key).or_insert(value);
        }
    }

    for spec in registry.fields.iter().filter(|f| f.required) {
        if !object.contains_key(spec.name) && !errors.iter().any(|e| e.starts_with(spec.name)) {
            errors.push(format!("{}: Required value is empty", spec.name));
        }
    }

    if errors.is_empty() {
        Ok(object)
    } else {
        Err(errors)
    }
}

// ============================================================================
// IMPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    /// Spreadsheet line number (header is usually line 1)
    pub line: usize,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub target: ImportTarget,
    pub file_name: String,
    pub file_hash: String,
    pub format: FileFormat,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub rows_failed: usize,
    pub rows_blank: usize,
    pub column_mapping: Vec<ColumnMatch>,
    pub unmatched_headers: Vec<String>,
    pub errors: Vec<RowError>,
    pub batch_id: Option<i64>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} of {} rows imported, {} failed",
            self.file_name, self.rows_imported, self.rows_total, self.rows_failed
        )
    }
}

/// Run the whole pipeline for one uploaded file.
///
/// Valid rows are written in one transaction together with the batch record.
/// A file that produced no rows is not recorded, so it can be fixed and
/// re-uploaded.
pub fn import_file(
    conn: &Connection,
    target: ImportTarget,
    file_name: &str,
    bytes: &[u8],
    actor: &str,
) -> Result<ImportReport, ImportError> {
    match target {
        ImportTarget::BudgetAuthority => import_records::<BudgetAuthority>(conn, target, file_name, bytes, actor),
        ImportTarget::MtwReserve => import_records::<MtwReserve>(conn, target, file_name, bytes, actor),
        ImportTarget::HapExpenditure => import_records::<HapExpenditure>(conn, target, file_name, bytes, actor),
        ImportTarget::Commitment => import_records::<Commitment>(conn, target, file_name, bytes, actor),
        ImportTarget::HcvUtilization => import_records::<HcvUtilization>(conn, target, file_name, bytes, actor),
    }
}

fn import_records<R: Record>(
    conn: &Connection,
    target: ImportTarget,
    file_name: &str,
    bytes: &[u8],
    actor: &str,
) -> Result<ImportReport, ImportError> {
    let file_hash = compute_file_hash(bytes);
    if let Some(batch) = find_import_batch(conn, &file_hash, target.as_str())? {
        return Err(ImportError::Duplicate {
            file_name: file_name.to_string(),
            batch_id: batch.id,
            imported_at: batch.created_at,
        });
    }

    let format = detect_format(file_name)?;
    let table = read_table(bytes, format)?;
    let registry = target.registry();
    let mapping = match_columns(&table.headers, &registry);

    if !mapping.missing_required.is_empty() {
        tracing::warn!(
            file = file_name,
            target = target.as_str(),
            missing = ?mapping.missing_required,
            "import rejected: required columns not found"
        );
        return Err(ImportError::MissingColumns {
            missing: mapping.missing_required,
            found: table.headers,
        });
    }

    let mut report = ImportReport {
        target,
        file_name: file_name.to_string(),
        file_hash: file_hash.clone(),
        format,
        rows_total: 0,
        rows_imported: 0,
        rows_failed: 0,
        rows_blank: 0,
        column_mapping: mapping.matches.clone(),
        unmatched_headers: mapping.unmatched_headers.clone(),
        errors: Vec::new(),
        batch_id: None,
    };

    let tx = conn.unchecked_transaction()?;

    for (line, cells) in &table.rows {
        if is_blank(cells) {
            report.rows_blank += 1;
            continue;
        }
        report.rows_total += 1;

        let outcome = row_to_object(cells, &mapping, &registry).and_then(|object| {
            let mut record: R = serde_json::from_value(Value::Object(object))
                .map_err(|e| vec![e.to_string()])?;
            match repository::prepare(&mut record) {
                Ok(()) => Ok(record),
                Err(RepoError::Validation(errors)) => {
                    Err(errors.iter().map(|e| e.to_string()).collect())
                }
                Err(other) => Err(vec![other.to_string()]),
            }
        });

        let mut record = match outcome {
            Ok(record) => record,
            Err(messages) => {
                report.errors.push(RowError { line: *line, messages });
                continue;
            }
        };

        match repository::insert_prepared(&tx, &mut record) {
            Ok(()) => report.rows_imported += 1,
            Err(RepoError::Conflict(message)) => {
                report.errors.push(RowError {
                    line: *line,
                    messages: vec![format!("duplicate record: {}", message)],
                });
            }
            Err(other) => return Err(other.into()),
        }
    }
    report.rows_failed = report.errors.len();

    if report.rows_imported > 0 {
        let batch_id = insert_import_batch(
            &tx,
            &file_hash,
            file_name,
            target.as_str(),
            report.rows_total,
            report.rows_imported,
            report.rows_failed,
            actor,
        )?;
        report.batch_id = Some(batch_id);

        let event = Event::new(
            "import_completed",
            "import_batch",
            &batch_id.to_string(),
            serde_json::json!({
                "target": target.as_str(),
                "file_name": file_name,
                "rows_imported": report.rows_imported,
                "rows_failed": report.rows_failed,
            }),
            actor,
        );
        insert_event(&tx, &event)?;
    }
    tx.commit()?;

    tracing::info!(
        file = file_name,
        target = target.as_str(),
        imported = report.rows_imported,
        failed = report.rows_failed,
        "import finished"
    );
    Ok(report)
}

/// Keep a copy of an upload in the scratch directory.
///
/// The stored name is prefixed with a UUID so repeated uploads never clash.
pub fn save_upload(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

    let safe_name: String = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();

    let path = dir.join(format!("{}_{}", uuid::Uuid::new_v4().simple(), safe_name));
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write upload {}", path.display()))?;
    Ok(path)
}
