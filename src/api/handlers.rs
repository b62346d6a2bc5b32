// Handlers for everything that is not plain CRUD: health, login, template
// activation, audit trail, dashboard figures and file imports.

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::error::ApiError;
use super::state::{actor, ApiResponse, AppState};
use crate::dashboard::{self, DashboardSummary, MonthlyPoint};
use crate::db::{self, Event, ImportBatch};
use crate::entities::{style_template, user, StyleTemplate, User};
use crate::import::{self, FieldRegistry, ImportReport, ImportTarget};

// ============================================================================
// HEALTH
// ============================================================================

/// GET /api/health - Health check
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::ok(serde_json::json!({
        "status": "OK",
        "version": crate::VERSION,
        "report_generation": state.llm.is_enabled(),
    })))
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/users/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let Json(request) = payload?;
    let conn = state.db()?;

    match user::authenticate(&conn, &request.username, &request.password)
        .map_err(crate::entities::RepoError::from)?
    {
        Some(user) => {
            tracing::info!(username = %user.username, "login succeeded");
            Ok(Json(ApiResponse::ok(user)))
        }
        None => {
            tracing::warn!(username = %request.username, "login failed");
            Err(ApiError::Unauthorized)
        }
    }
}

// ============================================================================
// STYLE TEMPLATES
// ============================================================================

/// GET /api/style-templates/active
pub async fn active_template(State(state): State<AppState>) -> Result<Json<ApiResponse<StyleTemplate>>, ApiError> {
    let conn = state.db()?;
    let template = style_template::get_active(&conn)
        .map_err(crate::entities::RepoError::from)?
        .ok_or_else(|| ApiError::NotFound("no active style template".to_string()))?;
    Ok(Json(ApiResponse::ok(template)))
}

/// POST /api/style-templates/:id/activate
pub async fn activate_template(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<StyleTemplate>>, ApiError> {
    let Path(id) = id?;
    let conn = state.db()?;
    let template = style_template::activate(&conn, id, &actor(&headers))?
        .ok_or_else(|| ApiError::NotFound(format!("style_template {} not found", id)))?;
    Ok(Json(ApiResponse::ok(template)))
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// GET /api/events/:entity/:id
pub async fn entity_events(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<Event>>>, ApiError> {
    let Path((entity, id)) = path?;
    let conn = state.db()?;
    let events = db::get_events_for_entity(&conn, &entity, &id)?;
    Ok(Json(ApiResponse::ok(events)))
}

// ============================================================================
// DASHBOARD
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

fn resolve_year(conn: &rusqlite::Connection, query: &YearQuery) -> Result<i32, ApiError> {
    match query.year {
        Some(year) => Ok(year),
        None => Ok(dashboard::default_year(conn)?),
    }
}

/// GET /api/dashboard/summary?year=
pub async fn dashboard_summary(
    State(state): State<AppState>,
    query: Result<Query<YearQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<DashboardSummary>>, ApiError> {
    let Query(query) = query?;
    let conn = state.db()?;
    let year = resolve_year(&conn, &query)?;
    Ok(Json(ApiResponse::ok(dashboard::summary(&conn, year)?)))
}

/// GET /api/dashboard/trend?year=
pub async fn dashboard_trend(
    State(state): State<AppState>,
    query: Result<Query<YearQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<MonthlyPoint>>>, ApiError> {
    let Query(query) = query?;
    let conn = state.db()?;
    let year = resolve_year(&conn, &query)?;
    Ok(Json(ApiResponse::ok(dashboard::monthly_trend(&conn, year)?)))
}

/// GET /api/dashboard/years
pub async fn dashboard_years(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<i32>>>, ApiError> {
    let conn = state.db()?;
    Ok(Json(ApiResponse::ok(dashboard::available_years(&conn)?)))
}

// ============================================================================
// IMPORTS
// ============================================================================

/// POST /api/import/:target (multipart, field `file`)
pub async fn import_upload(
    State(state): State<AppState>,
    target: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<ImportReport>>, ApiError> {
    let Path(target) = target?;
    let target: ImportTarget = target.parse()?;
    let mut multipart = multipart?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field.bytes().await?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".to_string()))?;

    match import::save_upload(&state.config.storage.upload_dir, &file_name, &bytes) {
        Ok(path) => tracing::debug!(path = %path.display(), "upload stored"),
        Err(e) => tracing::warn!(error = %e, "could not keep a copy of the upload"),
    }

    let conn = state.db()?;
    let report = import::import_file(&conn, target, &file_name, &bytes, &actor(&headers))?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/import/fields/:target
pub async fn import_fields(
    target: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<FieldRegistry>>, ApiError> {
    let Path(target) = target?;
    let target: ImportTarget = target.parse()?;
    Ok(Json(ApiResponse::ok(target.registry())))
}

/// GET /api/imports
pub async fn import_batches(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<ImportBatch>>>, ApiError> {
    let conn = state.db()?;
    Ok(Json(ApiResponse::ok(db::list_import_batches(&conn)?)))
}
