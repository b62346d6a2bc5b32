// 👤 User - dashboard accounts
//
// The password hash is stored but never serialized. Plaintext passwords only
// exist on the way in (`password` field) and are hashed before the row is
// written.

use super::repository::{get_bool, Record, RecordMeta};
use super::validation::{canonicalize, FieldError, Validator};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const USER_ROLES: &[&str] = &["admin", "analyst", "viewer"];

const MIN_PASSWORD_LEN: usize = 8;

fn default_role() -> String {
    "viewer".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta,

    pub username: String,
    pub email: String,

    #[serde(default)]
    pub display_name: Option<String>,

    /// One of `USER_ROLES`
    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Write-only: plaintext supplied on create or password change
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// `salt$sha256(salt + password)`
    #[serde(skip)]
    pub password_hash: String,
}

impl User {
    pub fn new(username: &str, email: &str, password: &str) -> Self {
        User {
            meta: RecordMeta::default(),
            username: username.to_string(),
            email: email.to_string(),
            display_name: None,
            role: default_role(),
            is_active: true,
            password: Some(password.to_string()),
            password_hash: String::new(),
        }
    }

    pub fn verify_password(&self, candidate: &str) -> bool {
        match self.password_hash.split_once('$') {
            Some((salt, expected)) => hash_with_salt(salt, candidate) == expected,
            None => false,
        }
    }
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, hash_with_salt(&salt, password))
}

fn hash_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn valid_username(username: &str) -> bool {
    (3..=64).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

impl Record for User {
    const TABLE: &'static str = "users";
    const ENTITY: &'static str = "user";
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "email",
        "display_name",
        "role",
        "is_active",
        "password_hash",
    ];
    const ORDER_BY: &'static str = "username";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            meta: RecordMeta::from_row(row)?,
            username: row.get("username")?,
            email: row.get("email")?,
            display_name: row.get("display_name")?,
            role: row.get("role")?,
            is_active: get_bool(row, "is_active")?,
            password: None,
            password_hash: row.get("password_hash")?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.username.clone().into(),
            self.email.clone().into(),
            self.display_name.clone().into(),
            self.role.clone().into(),
            self.is_active.into(),
            self.password_hash.clone().into(),
        ]
    }

    fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_lowercase();
        canonicalize(&mut self.role, USER_ROLES);
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut v = Validator::new();

        if !valid_username(&self.username) {
            v.error(
                "username",
                "Must be 3-64 characters of letters, digits, '_', '.' or '-'",
            );
        }
        if !valid_email(&self.email) {
            v.error("email", format!("Invalid email address: '{}'", self.email));
        }
        v.one_of("role", &self.role, USER_ROLES);

        match &self.password {
            Some(p) if p.chars().count() < MIN_PASSWORD_LEN => {
                v.error(
                    "password",
                    format!("Must be at least {} characters", MIN_PASSWORD_LEN),
                );
            }
            None if self.password_hash.is_empty() => {
                v.error("password", "Required field is empty");
            }
            _ => {}
        }
        v.finish()
    }

    fn keep_hidden(&mut self, previous: &Self) {
        if self.password_hash.is_empty() {
            self.password_hash = previous.password_hash.clone();
        }
    }

    fn before_save(&mut self) {
        if let Some(plain) = self.password.take() {
            self.password_hash = hash_password(&plain);
        }
    }
}

/// Look a user up by username (exact match).
pub fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<User>> {
    let sql = format!(
        "SELECT id, created_at, updated_at, {} FROM users WHERE username = ?1",
        User::COLUMNS.join(", ")
    );
    conn.query_row(&sql, [username.trim()], |row| User::from_row(row))
        .optional()
}

/// Verify credentials. Inactive users never authenticate.
pub fn authenticate(
    conn: &Connection,
    username: &str,
    password: &str,
) -> rusqlite::Result<Option<User>> {
    let user = find_by_username(conn, username)?;
    Ok(user.filter(|u| u.is_active && u.verify_password(password)))
}
