// Configuration loading (voucher-dashboard.toml + environment overrides).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Env var naming an explicit config file
pub const CONFIG_ENV: &str = "VOUCHER_CONFIG";

/// Config file looked up in the working directory when `VOUCHER_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "voucher-dashboard.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
    pub cors_permissive: bool,
    /// Built frontend to serve at `/`, if any
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
            max_upload_bytes: 25 * 1024 * 1024,
            cors_permissive: true,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("data/voucher-dashboard.db"),
        }
    }
}

/// Scratch directories. Nothing here is authoritative; the database is.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            upload_dir: PathBuf::from("data/uploads"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Report generation is disabled without a key
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 1500,
            temperature: 0.4,
        }
    }
}

impl LlmConfig {
    /// The key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load from `$VOUCHER_CONFIG`, else `./voucher-dashboard.toml` when it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    AppConfig::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get("VOUCHER_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(bind) = get("VOUCHER_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = get("VOUCHER_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("VOUCHER_EXPORT_DIR") {
            self.storage.export_dir = PathBuf::from(dir);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.server.bind.trim().is_empty() {
            return Err(invalid("server.bind", "must not be empty"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(invalid("server.max_upload_bytes", "must be greater than 0"));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path", "must not be empty"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", "must be between 0.0 and 2.0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens", "must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.llm.api_key().is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [llm]
            temperature = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.max_tokens, 1500);
        assert_eq!(config.database.path, PathBuf::from("data/voucher-dashboard.db"));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("VOUCHER_DB_PATH", "/tmp/test.db"),
            ("OPENAI_API_KEY", " sk-test "),
            ("OPENAI_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.llm.api_key(), Some("sk-test"));
        // Blank values are ignored
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.llm.temperature = 3.5;
        match config.validate() {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "llm.temperature"),
            other => panic!("expected validation error, got {:?}", other),
        }

        let mut config = AppConfig::default();
        config.server.max_upload_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_errors() {
        let missing = AppConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound { .. })));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nbind = ").unwrap();
        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[database]\npath = \"x.db\"\n").unwrap();
        assert_eq!(AppConfig::from_file(&good).unwrap().database.path, PathBuf::from("x.db"));
    }
}
