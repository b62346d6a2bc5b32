use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Event for the audit trail. Every create / update / delete / import is one.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        -- Annual HAP / admin fee budget authority
        CREATE TABLE IF NOT EXISTS budget_authorities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fiscal_year INTEGER NOT NULL,
            hap_budget_authority REAL NOT NULL,
            admin_fee_authority REAL NOT NULL DEFAULT 0,
            authorized_vouchers INTEGER NOT NULL DEFAULT 0,
            effective_date TEXT NOT NULL,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- Moving to Work reserve balances
        CREATE TABLE IF NOT EXISTS mtw_reserves (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fiscal_year INTEGER NOT NULL,
            reserve_type TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            beginning_balance REAL NOT NULL DEFAULT 0,
            deposits REAL NOT NULL DEFAULT 0,
            withdrawals REAL NOT NULL DEFAULT 0,
            ending_balance REAL NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- Monthly HAP spending per program
        CREATE TABLE IF NOT EXISTS hap_expenditures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            program TEXT NOT NULL,
            units_leased INTEGER NOT NULL DEFAULT 0,
            hap_amount REAL NOT NULL DEFAULT 0,
            average_hap_cost REAL NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS commitments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fiscal_year INTEGER NOT NULL,
            description TEXT NOT NULL,
            vendor TEXT,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            disbursed_amount REAL NOT NULL DEFAULT 0,
            committed_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT,
            updated_at TEXT
        );

        -- Monthly voucher utilization, one row per month
        CREATE TABLE IF NOT EXISTS hcv_utilization (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            authorized_vouchers INTEGER NOT NULL,
            leased_vouchers INTEGER NOT NULL DEFAULT 0,
            budget_authority REAL NOT NULL DEFAULT 0,
            hap_expenditure REAL NOT NULL DEFAULT 0,
            utilization_rate REAL NOT NULL DEFAULT 0,
            budget_utilization_rate REAL NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE (year, month)
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            display_name TEXT,
            role TEXT NOT NULL DEFAULT 'viewer',
            is_active INTEGER NOT NULL DEFAULT 1,
            password_hash TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        );

        -- Prompt styles for generated reports; at most one active
        CREATE TABLE IF NOT EXISTS style_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT,
            tone TEXT NOT NULL DEFAULT 'professional',
            instructions TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            report_type TEXT NOT NULL,
            year INTEGER,
            content TEXT NOT NULL,
            model TEXT NOT NULL,
            style_template_id INTEGER,
            created_at TEXT,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS import_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_hash TEXT NOT NULL,
            file_name TEXT NOT NULL,
            target TEXT NOT NULL,
            rows_total INTEGER NOT NULL,
            rows_imported INTEGER NOT NULL,
            rows_failed INTEGER NOT NULL,
            actor TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (file_hash, target)
        );

        -- Audit trail
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_budget_year ON budget_authorities(fiscal_year);
        CREATE INDEX IF NOT EXISTS idx_reserves_year ON mtw_reserves(fiscal_year);
        CREATE INDEX IF NOT EXISTS idx_hap_period ON hap_expenditures(year, month);
        CREATE INDEX IF NOT EXISTS idx_commitments_year ON commitments(fiscal_year);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        ",
    )
    .context("Failed to create schema")?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// IMPORT BATCHES
// ============================================================================

/// One accepted upload. The (file_hash, target) pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: i64,
    pub file_hash: String,
    pub file_name: String,
    pub target: String,
    pub rows_total: i64,
    pub rows_imported: i64,
    pub rows_failed: i64,
    pub actor: String,
    pub created_at: String,
}

/// SHA-256 of the uploaded bytes, hex encoded
pub fn compute_file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn find_import_batch(
    conn: &Connection,
    file_hash: &str,
    target: &str,
) -> Result<Option<ImportBatch>> {
    let batch = conn
        .query_row(
            "SELECT id, file_hash, file_name, target, rows_total, rows_imported,
                    rows_failed, actor, created_at
             FROM import_batches
             WHERE file_hash = ?1 AND target = ?2",
            params![file_hash, target],
            map_import_batch,
        )
        .optional()?;
    Ok(batch)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_import_batch(
    conn: &Connection,
    file_hash: &str,
    file_name: &str,
    target: &str,
    rows_total: usize,
    rows_imported: usize,
    rows_failed: usize,
    actor: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_batches (
            file_hash, file_name, target, rows_total, rows_imported, rows_failed,
            actor, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            file_hash,
            file_name,
            target,
            rows_total as i64,
            rows_imported as i64,
            rows_failed as i64,
            actor,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_import_batches(conn: &Connection) -> Result<Vec<ImportBatch>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_hash, file_name, target, rows_total, rows_imported,
                rows_failed, actor, created_at
         FROM import_batches
         ORDER BY id DESC",
    )?;
    let batches = stmt
        .query_map([], map_import_batch)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(batches)
}

fn map_import_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        id: row.get(0)?,
        file_hash: row.get(1)?,
        file_name: row.get(2)?,
        target: row.get(3)?,
        rows_total: row.get(4)?,
        rows_imported: row.get(5)?,
        rows_failed: row.get(6)?,
        actor: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_database_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('budget_authorities', 'mtw_reserves', 'hap_expenditures',
                              'commitments', 'hcv_utilization', 'users',
                              'style_templates', 'reports', 'import_batches', 'events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 10);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "commitment_created",
            "commitment",
            "42",
            serde_json::json!({"amount": 1500.0}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "commitment", "42").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "commitment_created");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["amount"], 1500.0);
    }

    #[test]
    fn test_import_batch_uniqueness() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let hash = compute_file_hash(b"fiscal_year,amount\n2024,100\n");
        assert_eq!(hash.len(), 64, "SHA-256 hash should be 64 hex characters");

        insert_import_batch(&conn, &hash, "ba.csv", "budget_authority", 1, 1, 0, "cli").unwrap();

        // Same file may feed a different target
        insert_import_batch(&conn, &hash, "ba.csv", "commitment", 1, 0, 1, "cli").unwrap();

        // But not the same target twice
        assert!(
            insert_import_batch(&conn, &hash, "ba.csv", "budget_authority", 1, 1, 0, "cli")
                .is_err()
        );

        let found = find_import_batch(&conn, &hash, "budget_authority").unwrap();
        assert_eq!(found.map(|b| b.rows_imported), Some(1));
        assert_eq!(list_import_batches(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_open_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voucher.db");

        let conn = open_database(&path).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();

        assert!(path.exists());
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
