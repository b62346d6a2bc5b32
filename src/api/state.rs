// Shared application state and the success envelope.

use axum::http::HeaderMap;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::ApiError;
use crate::config::AppConfig;
use crate::report::llm::LlmClient;

/// Header naming who made a change; recorded on audit events
pub const ACTOR_HEADER: &str = "x-actor";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<AppConfig>,
    pub llm: Arc<LlmClient>,
}

impl AppState {
    pub fn new(conn: Connection, config: AppConfig) -> Self {
        let llm = LlmClient::from_config(&config.llm);
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            llm: Arc::new(llm),
        }
    }

    /// Lock the connection. Never hold the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Actor for audit events: the `X-Actor` header, else "api".
pub fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("api")
        .to_string()
}
