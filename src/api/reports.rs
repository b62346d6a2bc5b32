// Report endpoints: SSE generation, listing and PDF download.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::ApiError;
use super::state::{actor, ApiResponse, AppState};
use crate::entities::repository::ListQuery;
use crate::entities::Report;
use crate::report::llm::LlmEvent;
use crate::report::{self, GenerateRequest, PreparedReport};

/// Buffered LLM events between the model task and the SSE response
const LLM_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE_SECS: u64 = 15;

/// POST /api/reports/generate
///
/// Streams `token` events while the model writes, then `done` once the report
/// is saved, or a single `error` event.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    let prepared = {
        let conn = state.db()?;
        report::prepare_report(&conn, &request)?
    };

    tracing::info!(
        report_type = prepared.report_type.as_str(),
        year = prepared.year,
        "report generation started"
    );

    let (tx, rx) = mpsc::channel(LLM_CHANNEL_CAPACITY);
    let llm = state.llm.clone();
    let prompt = prepared.prompt.clone();
    tokio::spawn(async move {
        if let Err(e) = llm.stream_chat(&prompt, tx).await {
            tracing::error!(error = %e, "report stream task failed");
        }
    });

    let stream = report_events(state, prepared, actor(&headers), rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}

struct StreamContext {
    rx: mpsc::Receiver<LlmEvent>,
    state: AppState,
    prepared: PreparedReport,
    actor: String,
}

/// Turn model events into SSE events. The stream ends after `done` or `error`.
fn report_events(
    state: AppState,
    prepared: PreparedReport,
    actor: String,
    rx: mpsc::Receiver<LlmEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let context = StreamContext {
        rx,
        state,
        prepared,
        actor,
    };

    stream::unfold(Some(context), |context| async move {
        let mut context = context?;
        let event = match context.rx.recv().await {
            Some(LlmEvent::Token { text }) => {
                let event = sse_event("token", serde_json::json!({ "text": text }));
                return Some((Ok::<Event, Infallible>(event), Some(context)));
            }
            Some(LlmEvent::Complete { full_text }) => match save_completed(&context, &full_text) {
                Ok(saved) => sse_event(
                    "done",
                    serde_json::json!({ "report_id": saved.meta.id, "title": saved.title }),
                ),
                Err(e) => {
                    tracing::error!(error = %e, "failed to save generated report");
                    sse_event("error", serde_json::json!({ "message": "Failed to save report" }))
                }
            },
            Some(LlmEvent::Error { message }) => {
                tracing::warn!(%message, "report generation failed");
                sse_event("error", serde_json::json!({ "message": message }))
            }
            None => sse_event(
                "error",
                serde_json::json!({ "message": "Report stream ended unexpectedly" }),
            ),
        };
        Some((Ok::<Event, Infallible>(event), None))
    })
}

fn save_completed(context: &StreamContext, content: &str) -> Result<Report, ApiError> {
    let conn = context.state.db()?;
    let saved = report::save_report(
        &conn,
        &context.prepared,
        content,
        context.state.llm.model(),
        &context.actor,
    )?;
    Ok(saved)
}

fn sse_event(name: &str, data: Value) -> Event {
    tracing::debug!(event = name, "sse event");
    Event::default().event(name).data(data.to_string())
}

/// GET /api/reports
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Report>>>, ApiError> {
    let Query(query) = query?;
    let conn = state.db()?;
    Ok(Json(ApiResponse::ok(report::list_reports(&conn, &query)?)))
}

/// GET /api/reports/:id
pub async fn get_one(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let Path(id) = id?;
    let conn = state.db()?;
    Ok(Json(ApiResponse::ok(load(&conn, id)?)))
}

/// DELETE /api/reports/:id
pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let Path(id) = id?;
    let conn = state.db()?;
    if !report::delete_report(&conn, id, &actor(&headers))? {
        return Err(ApiError::NotFound(format!("report {} not found", id)));
    }
    Ok(Json(ApiResponse::ok(serde_json::json!({ "deleted": id }))))
}

/// GET /api/reports/:id/pdf
pub async fn pdf(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let saved = {
        let conn = state.db()?;
        load(&conn, id)?
    };

    let bytes = report::render_pdf(&saved)?;
    let file_name = report::pdf::file_name(&saved);
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        file_name,
        urlencoding::encode(&file_name)
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ApiError::Internal(format!("bad content-disposition: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn load(conn: &rusqlite::Connection, id: i64) -> Result<Report, ApiError> {
    report::get_report(conn, id)?.ok_or_else(|| ApiError::NotFound(format!("report {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::report::ReportType;
    use crate::AppConfig;
    use axum::body::to_bytes;
    use rusqlite::Connection;

    fn test_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        AppState::new(conn, AppConfig::default())
    }

    fn prepared(state: &AppState) -> PreparedReport {
        let request = GenerateRequest {
            report_type: ReportType::Reserves,
            year: Some(2024),
            title: None,
            custom_prompt: None,
        };
        report::prepare_report(&state.db().unwrap(), &request).unwrap()
    }

    /// Render the SSE body produced from a fixed sequence of model events.
    async fn render(state: &AppState, events: Vec<LlmEvent>) -> String {
        let (tx, rx) = mpsc::channel(8);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let stream = report_events(state.clone(), prepared(state), "tester".to_string(), rx);
        let response = Sse::new(stream).into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn data_after(body: &str, event: &str) -> Value {
        let marker = format!("event: {}\n", event);
        let rest = &body[body.find(&marker).unwrap() + marker.len()..];
        let line = rest.lines().next().unwrap();
        serde_json::from_str(line.strip_prefix("data: ").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_tokens_then_done_saves_report() {
        let state = test_state();
        let body = render(
            &state,
            vec![
                LlmEvent::Token { text: "Reserves ".to_string() },
                LlmEvent::Token { text: "held.".to_string() },
                LlmEvent::Complete { full_text: "Reserves held.".to_string() },
            ],
        )
        .await;

        assert_eq!(body.matches("event: token").count(), 2);
        assert!(body.contains(r#"{"text":"Reserves "}"#));
        assert!(body.find("event: token").unwrap() < body.find("event: done").unwrap());
        assert!(!body.contains("event: error"));

        let done = data_after(&body, "done");
        assert_eq!(done["title"], "MTW Reserves Report FY2024");
        let id = done["report_id"].as_i64().unwrap();

        let saved = report::get_report(&state.db().unwrap(), id).unwrap().unwrap();
        assert_eq!(saved.content, "Reserves held.");
        assert_eq!(saved.report_type, "reserves");
    }

    #[tokio::test]
    async fn test_model_error_ends_stream() {
        let state = test_state();
        let body = render(
            &state,
            vec![
                LlmEvent::Token { text: "Partial".to_string() },
                LlmEvent::Error { message: "Model API returned status 429".to_string() },
                LlmEvent::Complete { full_text: "ignored".to_string() },
            ],
        )
        .await;

        assert_eq!(data_after(&body, "error")["message"], "Model API returned status 429");
        assert!(!body.contains("event: done"));
        assert!(report::list_reports(&state.db().unwrap(), &ListQuery::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_reports_error() {
        let state = test_state();
        let body = render(&state, Vec::new()).await;

        assert_eq!(data_after(&body, "error")["message"], "Report stream ended unexpectedly");
    }
}
