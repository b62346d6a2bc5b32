// Generic CRUD handlers, instantiated once per entity in the router.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::Value;

use super::error::ApiError;
use super::state::{actor, ApiResponse, AppState};
use crate::entities::repository::{self, ListQuery, Record};

/// GET /api/<entities>?year=&limit=&offset=
pub async fn list<R: Record>(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<R>>>, ApiError> {
    let Query(query) = query?;
    let conn = state.db()?;
    let records = repository::list::<R>(&conn, &query)?;
    Ok(Json(ApiResponse::ok(records)))
}

/// GET /api/<entities>/:id
pub async fn get_one<R: Record>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<R>>, ApiError> {
    let Path(id) = id?;
    let conn = state.db()?;
    let record = repository::get::<R>(&conn, id)?.ok_or_else(|| not_found::<R>(id))?;
    Ok(Json(ApiResponse::ok(record)))
}

/// POST /api/<entities>
pub async fn create<R: Record>(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<R>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<R>>), ApiError> {
    let Json(record) = payload?;
    let conn = state.db()?;
    let saved = repository::insert(&conn, record, &actor(&headers))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(saved))))
}

/// PUT /api/<entities>/:id (body keys replace stored values, others are kept)
pub async fn update<R: Record>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ApiResponse<R>>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let conn = state.db()?;
    let record = repository::update::<R>(&conn, id, patch, &actor(&headers))?
        .ok_or_else(|| not_found::<R>(id))?;
    Ok(Json(ApiResponse::ok(record)))
}

/// DELETE /api/<entities>/:id
pub async fn delete<R: Record>(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let Path(id) = id?;
    let conn = state.db()?;
    if !repository::delete::<R>(&conn, id, &actor(&headers))? {
        return Err(not_found::<R>(id));
    }
    Ok(Json(ApiResponse::ok(serde_json::json!({ "deleted": id }))))
}

fn not_found<R: Record>(id: i64) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", R::ENTITY, id))
}
