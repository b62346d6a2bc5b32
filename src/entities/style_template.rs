// 🎨 Style Template - voice and instructions for generated reports
//
// At most one template is active. Saving an active template deactivates the
// rest inside the same transaction.

use super::repository::{self, get_bool, Record, RecordMeta, RepoResult};
use super::validation::{FieldError, Validator};
use crate::db::{insert_event, Event};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

fn default_tone() -> String {
    "professional".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleTemplate {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_tone")]
    pub tone: String,

    /// Free-form guidance appended to the report system prompt
    pub instructions: String,

    #[serde(default)]
    pub is_active: bool,
}

impl StyleTemplate {
    pub fn new(name: &str, instructions: &str) -> Self {
        StyleTemplate {
            meta: RecordMeta::default(),
            name: name.to_string(),
            description: None,
            tone: default_tone(),
            instructions: instructions.to_string(),
            is_active: false,
        }
    }
}

impl Record for StyleTemplate {
    const TABLE: &'static str = "style_templates";
    const ENTITY: &'static str = "style_template";
    const COLUMNS: &'static [&'static str] =
        &["name", "description", "tone", "instructions", "is_active"];
    const ORDER_BY: &'static str = "is_active DESC, name";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StyleTemplate {
            meta: RecordMeta::from_row(row)?,
            name: row.get("name")?,
            description: row.get("description")?,
            tone: row.get("tone")?,
            instructions: row.get("instructions")?,
            is_active: get_bool(row, "is_active")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.name.clone().into(),
            self.description.clone().into(),
            self.tone.clone().into(),
            self.instructions.clone().into(),
            self.is_active.into(),
        ]
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.tone = self.tone.trim().to_lowercase();
        if self.tone.is_empty() {
            self.tone = default_tone();
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Validator::new()
            .non_empty("name", &self.name)
            .non_empty("instructions", &self.instructions)
            .finish()
    }

    fn after_save(&self, conn: &Connection) -> rusqlite::Result<()> {
        if let (true, Some(id)) = (self.is_active, self.id()) {
            deactivate_others(conn, id)?;
        }
        Ok(())
    }
}

fn deactivate_others(conn: &Connection, keep_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE style_templates SET is_active = 0 WHERE id != ?1 AND is_active != 0",
        params![keep_id],
    )
}

/// The active template, if one is set.
pub fn get_active(conn: &Connection) -> rusqlite::Result<Option<StyleTemplate>> {
    let sql = format!(
        "SELECT id, created_at, updated_at, {} FROM style_templates
         WHERE is_active != 0 ORDER BY updated_at DESC LIMIT 1",
        StyleTemplate::COLUMNS.join(", ")
    );
    conn.query_row(&sql, [], |row| StyleTemplate::from_row(row))
        .optional()
}

/// Make `id` the only active template. Returns None for an unknown id.
pub fn activate(conn: &Connection, id: i64, actor: &str) -> RepoResult<Option<StyleTemplate>> {
    let tx = conn.unchecked_transaction()?;

    let updated = tx.execute(
        "UPDATE style_templates SET is_active = 1, updated_at = ?1 WHERE id = ?2",
        params![chrono::Utc::now().to_rfc3339(), id],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    deactivate_others(&tx, id)?;

    let event = Event::new(
        "style_template_activated",
        StyleTemplate::ENTITY,
        &id.to_string(),
        serde_json::json!({ "id": id }),
        actor,
    );
    insert_event(&tx, &event)?;
    tx.commit()?;

    repository::get(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::repository::ListQuery;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn active_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM style_templates WHERE is_active != 0",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_activate_leaves_exactly_one_active() {
        let conn = test_conn();
        let board = repository::insert(
            &conn,
            StyleTemplate::new("Board Brief", "Keep it under one page."),
            "test",
        )
        .unwrap();
        let hud = repository::insert(
            &conn,
            StyleTemplate::new("HUD Narrative", "Cite program regulations."),
            "test",
        )
        .unwrap();

        activate(&conn, board.meta.id.unwrap(), "test").unwrap().unwrap();
        assert_eq!(active_count(&conn), 1);

        let active = activate(&conn, hud.meta.id.unwrap(), "test").unwrap().unwrap();
        assert!(active.is_active);
        assert_eq!(active_count(&conn), 1);
        assert_eq!(get_active(&conn).unwrap().unwrap().name, "HUD Narrative");

        assert!(activate(&conn, 9_999, "test").unwrap().is_none());
        assert_eq!(active_count(&conn), 1);
    }

    #[test]
    fn test_saving_active_template_deactivates_others() {
        let conn = test_conn();
        let mut first = StyleTemplate::new("First", "a");
        first.is_active = true;
        repository::insert(&conn, first, "test").unwrap();

        let mut second = StyleTemplate::new("Second", "b");
        second.is_active = true;
        let second = repository::insert(&conn, second, "test").unwrap();

        assert_eq!(active_count(&conn), 1);
        assert_eq!(get_active(&conn).unwrap().unwrap().meta.id, second.meta.id);

        let listed: Vec<StyleTemplate> = repository::list(&conn, &ListQuery::default()).unwrap();
        assert_eq!(listed[0].name, "Second", "active template sorts first");
    }

    #[test]
    fn test_no_active_template() {
        let conn = test_conn();
        repository::insert(&conn, StyleTemplate::new("Plain", "x"), "test").unwrap();
        assert!(get_active(&conn).unwrap().is_none());
    }

    #[test]
    fn test_tone_defaults() {
        let template: StyleTemplate = serde_json::from_value(serde_json::json!({
            "name": "Plain",
            "instructions": "Write plainly.",
            "tone": "  "
        }))
        .unwrap();
        let mut template = template;
        template.normalize();
        assert_eq!(template.tone, "professional");
    }
}
