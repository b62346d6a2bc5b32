// 🗃️ Generic Repository - one set of CRUD operations for every table
//
// Each entity describes its table through the `Record` trait; the functions
// below do lookup / validate / save / audit for all of them.

use super::validation::{join_errors, FieldError};
use crate::db::{insert_event, Event};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// RECORD METADATA
// ============================================================================

/// Columns every table carries. Flattened into each entity's JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl RecordMeta {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecordMeta {
            id: Some(row.get("id")?),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

// ============================================================================
// RECORD TRAIT
// ============================================================================

/// A row type stored in its own table.
///
/// `COLUMNS` and `to_values()` must line up one-to-one; `id`, `created_at`
/// and `updated_at` are handled by the repository and never listed.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name
    const TABLE: &'static str;

    /// Entity label used in the audit trail and error messages
    const ENTITY: &'static str;

    /// Stored columns, in `to_values()` order
    const COLUMNS: &'static [&'static str];

    /// Column that `ListQuery::year` filters on, if any
    const YEAR_COLUMN: Option<&'static str> = None;

    /// ORDER BY clause for listings
    const ORDER_BY: &'static str = "id";

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Build from a row selected with `id, created_at, updated_at` + `COLUMNS`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Column values, in `COLUMNS` order.
    fn to_values(&self) -> Vec<Value>;

    /// Recompute derived fields and tidy loose input (dates, casing).
    fn normalize(&mut self) {}

    fn validate(&self) -> Vec<FieldError>;

    /// Carry over stored values the JSON form never exposes.
    fn keep_hidden(&mut self, _previous: &Self) {}

    /// Last step before the row is written, after validation passed.
    fn before_save(&mut self) {}

    /// Runs inside the same transaction right after the row is written.
    fn after_save(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    fn id(&self) -> Option<i64> {
        self.meta().id
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepoError::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            other => RepoError::Database(other),
        }
    }
}

impl From<anyhow::Error> for RepoError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<rusqlite::Error>() {
            Ok(db) => db.into(),
            Err(other) => RepoError::InvalidPayload(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub year: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const DEFAULT_LIMIT: i64 = 500;
const MAX_LIMIT: i64 = 5_000;

fn select_clause<R: Record>() -> String {
    format!(
        "SELECT id, created_at, updated_at, {} FROM {}",
        R::COLUMNS.join(", "),
        R::TABLE
    )
}

/// Prepare a record for storage: derived fields, validation, final hooks.
pub fn prepare<R: Record>(record: &mut R) -> RepoResult<()> {
    record.normalize();
    let errors = record.validate();
    if !errors.is_empty() {
        return Err(RepoError::Validation(errors));
    }
    record.before_save();
    Ok(())
}

/// Insert an already-prepared record. No transaction, no audit event.
///
/// The importer uses this inside its own batch transaction.
pub fn insert_prepared<R: Record>(conn: &Connection, record: &mut R) -> RepoResult<()> {
    let now = Utc::now().to_rfc3339();
    let placeholders: Vec<String> = (1..=R::COLUMNS.len() + 2)
        .map(|i| format!("?{}", i))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}, created_at, updated_at) VALUES ({})",
        R::TABLE,
        R::COLUMNS.join(", "),
        placeholders.join(", ")
    );

    let mut values = record.to_values();
    values.push(Value::Text(now.clone()));
    values.push(Value::Text(now.clone()));
    conn.execute(&sql, params_from_iter(values))?;

    let meta = record.meta_mut();
    meta.id = Some(conn.last_insert_rowid());
    meta.created_at = Some(now.clone());
    meta.updated_at = Some(now);

    record.after_save(conn)?;
    Ok(())
}

/// Validate and insert a new record, logging a `created` event.
pub fn insert<R: Record>(conn: &Connection, mut record: R, actor: &str) -> RepoResult<R> {
    *record.meta_mut() = RecordMeta::default();
    prepare(&mut record)?;

    let tx = conn.unchecked_transaction()?;
    insert_prepared(&tx, &mut record)?;
    log_change(&tx, "created", &record, actor)?;
    tx.commit()?;

    tracing::debug!(entity = R::ENTITY, id = ?record.id(), "record created");
    Ok(record)
}

pub fn get<R: Record>(conn: &Connection, id: i64) -> RepoResult<Option<R>> {
    let sql = format!("{} WHERE id = ?1", select_clause::<R>());
    let record = conn
        .query_row(&sql, [id], |row| R::from_row(row))
        .optional()?;
    Ok(record)
}

pub fn list<R: Record>(conn: &Connection, query: &ListQuery) -> RepoResult<Vec<R>> {
    let mut sql = select_clause::<R>();
    let mut values: Vec<Value> = Vec::new();

    if let (Some(year), Some(column)) = (query.year, R::YEAR_COLUMN) {
        sql.push_str(&format!(" WHERE {} = ?1", column));
        values.push(Value::Integer(year as i64));
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    sql.push_str(&format!(
        " ORDER BY {} LIMIT {} OFFSET {}",
        R::ORDER_BY,
        limit,
        offset
    ));

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values), |row| R::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Merge `patch` into the stored record, re-validate and save.
///
/// Top-level keys in `patch` replace the stored values; keys not present
/// keep theirs. Returns `Ok(None)` when the id does not exist.
pub fn update<R: Record>(
    conn: &Connection,
    id: i64,
    patch: serde_json::Value,
    actor: &str,
) -> RepoResult<Option<R>> {
    let Some(existing) = get::<R>(conn, id)? else {
        return Ok(None);
    };

    let serde_json::Value::Object(changes) = patch else {
        return Err(RepoError::InvalidPayload(
            "update body must be a JSON object".to_string(),
        ));
    };

    let mut merged = serde_json::to_value(&existing)?;
    if let serde_json::Value::Object(target) = &mut merged {
        for (key, value) in changes {
            if matches!(key.as_str(), "id" | "created_at" | "updated_at") {
                continue;
            }
            target.insert(key, value);
        }
    }

    let mut record: R = serde_json::from_value(merged)
        .map_err(|e| RepoError::InvalidPayload(e.to_string()))?;
    *record.meta_mut() = existing.meta().clone();
    record.keep_hidden(&existing);
    prepare(&mut record)?;

    let now = Utc::now().to_rfc3339();
    let assignments: Vec<String> = R::COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {}, updated_at = ?{} WHERE id = ?{}",
        R::TABLE,
        assignments.join(", "),
        R::COLUMNS.len() + 1,
        R::COLUMNS.len() + 2
    );

    let mut values = record.to_values();
    values.push(Value::Text(now.clone()));
    values.push(Value::Integer(id));

    let tx = conn.unchecked_transaction()?;
    tx.execute(&sql, params_from_iter(values))?;
    record.meta_mut().updated_at = Some(now);
    record.after_save(&tx)?;
    log_change(&tx, "updated", &record, actor)?;
    tx.commit()?;

    Ok(Some(record))
}

/// Delete by id. Returns false when nothing matched.
pub fn delete<R: Record>(conn: &Connection, id: i64, actor: &str) -> RepoResult<bool> {
    let Some(existing) = get::<R>(conn, id)? else {
        return Ok(false);
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", R::TABLE), [id])?;
    log_change(&tx, "deleted", &existing, actor)?;
    tx.commit()?;

    Ok(true)
}

pub fn count<R: Record>(conn: &Connection) -> RepoResult<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", R::TABLE), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn log_change<R: Record>(
    conn: &Connection,
    action: &str,
    record: &R,
    actor: &str,
) -> RepoResult<()> {
    let event = Event::new(
        &format!("{}_{}", R::ENTITY, action),
        R::ENTITY,
        &record.id().map(|id| id.to_string()).unwrap_or_default(),
        serde_json::to_value(record)?,
        actor,
    );
    insert_event(conn, &event)?;
    Ok(())
}

// ============================================================================
// ROW HELPERS
// ============================================================================

/// Read a 0/1 integer column as bool.
pub fn get_bool(row: &Row<'_>, column: &str) -> rusqlite::Result<bool> {
    let value: i64 = row.get(column)?;
    Ok(value != 0)
}
