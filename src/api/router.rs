// 🌐 Router - every /api route plus the outer layers

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::{crud, handlers, reports};
use crate::entities::{
    BudgetAuthority, Commitment, HapExpenditure, HcvUtilization, MtwReserve, Record, StyleTemplate, User,
};

/// list/create on `base`, get/update/delete on `base/:id`
fn with_crud<R: Record>(router: Router<AppState>, base: &str) -> Router<AppState> {
    router
        .route(base, get(crud::list::<R>).post(crud::create::<R>))
        .route(
            &format!("{}/:id", base),
            get(crud::get_one::<R>)
                .put(crud::update::<R>)
                .delete(crud::delete::<R>),
        )
}

pub fn build_router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/health", get(handlers::health))
        // Static segments take priority over `/:id`
        .route("/users/login", post(handlers::login))
        .route("/style-templates/active", get(handlers::active_template))
        .route("/style-templates/:id/activate", post(handlers::activate_template))
        .route("/events/:entity/:id", get(handlers::entity_events))
        // Dashboard
        .route("/dashboard/summary", get(handlers::dashboard_summary))
        .route("/dashboard/trend", get(handlers::dashboard_trend))
        .route("/dashboard/years", get(handlers::dashboard_years))
        // Imports
        .route("/import/fields/:target", get(handlers::import_fields))
        .route("/import/:target", post(handlers::import_upload))
        .route("/imports", get(handlers::import_batches))
        // Reports
        .route("/reports", get(reports::list))
        .route("/reports/generate", post(reports::generate))
        .route("/reports/:id", get(reports::get_one).delete(reports::delete))
        .route("/reports/:id/pdf", get(reports::pdf));

    api = with_crud::<BudgetAuthority>(api, "/budget-authorities");
    api = with_crud::<MtwReserve>(api, "/mtw-reserves");
    api = with_crud::<HapExpenditure>(api, "/hap-expenditures");
    api = with_crud::<Commitment>(api, "/commitments");
    api = with_crud::<HcvUtilization>(api, "/hcv-utilization");
    api = with_crud::<User>(api, "/users");
    api = with_crud::<StyleTemplate>(api, "/style-templates");

    let config = state.config.clone();
    let cors = if config.server.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    let mut app = Router::new().nest("/api", api.with_state(state));
    if let Some(dir) = &config.server.static_dir {
        tracing::info!(dir = %dir.display(), "serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::setup_database;
    use crate::report::{self, GenerateRequest, ReportType};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use rusqlite::Connection;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "voucher-test-boundary";

    fn test_state(upload_dir: &std::path::Path) -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let mut config = AppConfig::default();
        config.storage.upload_dir = upload_dir.to_path_buf();
        AppState::new(conn, config)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = send(app, request).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn multipart_request(uri: &str, file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = file_name,
            c = contents
        );
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, json) = call(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "OK");
        assert_eq!(json["data"]["report_generation"], false);
    }

    #[tokio::test]
    async fn test_budget_authority_crud_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, created) = call(
            &app,
            Method::POST,
            "/api/budget-authorities",
            Some(json!({
                "fiscal_year": 2024,
                "hap_budget_authority": 12500000.456,
                "authorized_vouchers": 1200,
                "effective_date": "01/01/2024"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["data"]["id"].as_i64().unwrap();
        assert_eq!(created["data"]["effective_date"], "2024-01-01");
        assert_eq!(created["data"]["hap_budget_authority"], 12500000.46);

        let (status, list) = call(&app, Method::GET, "/api/budget-authorities?year=2024", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["data"].as_array().unwrap().len(), 1);

        let (_, other_year) = call(&app, Method::GET, "/api/budget-authorities?year=2023", None).await;
        assert!(other_year["data"].as_array().unwrap().is_empty());

        let uri = format!("/api/budget-authorities/{}", id);
        let (status, updated) = call(&app, Method::PUT, &uri, Some(json!({ "admin_fee_authority": 950000 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["data"]["admin_fee_authority"], 950000.0);
        assert_eq!(updated["data"]["authorized_vouchers"], 1200);

        let (status, deleted) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["data"]["deleted"], id);

        let (status, missing) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["error"]["code"], "NOT_FOUND");

        let (status, events) = call(&app, Method::GET, &format!("/api/events/budget_authority/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = events["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(types.len(), 3);
        assert!(types.contains(&"budget_authority_created"));
        assert!(types.contains(&"budget_authority_deleted"));
    }

    #[tokio::test]
    async fn test_validation_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, json) = call(
            &app,
            Method::POST,
            "/api/hcv-utilization",
            Some(json!({ "year": 2024, "month": 13, "authorized_vouchers": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["fields"][0]["field"], "month");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/commitments")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, bytes) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        let (status, _) = call(&app, Method::GET, "/api/commitments/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undecodable_path_params_use_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        for uri in ["/api/events/budget_authority/%FF", "/api/import/fields/%FF"] {
            let (status, json) = call(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(json["success"], false);
            assert_eq!(json["error"]["code"], "BAD_REQUEST");
        }
    }

    #[tokio::test]
    async fn test_users_hide_hash_and_login() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, created) = call(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({ "username": "analyst", "email": "analyst@pha.org", "password": "s3cret-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["data"].get("password").is_none());
        assert!(created["data"].get("password_hash").is_none());

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({ "username": "analyst", "email": "other@pha.org", "password": "another-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, login) = call(
            &app,
            Method::POST,
            "/api/users/login",
            Some(json!({ "username": "analyst", "password": "s3cret-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(login["data"]["username"], "analyst");

        let (status, failed) = call(
            &app,
            Method::POST,
            "/api/users/login",
            Some(json!({ "username": "analyst", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(failed["error"]["code"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_style_template_activation() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, _) = call(&app, Method::GET, "/api/style-templates/active", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, first) = call(
            &app,
            Method::POST,
            "/api/style-templates",
            Some(json!({ "name": "Board", "instructions": "Short paragraphs.", "is_active": true })),
        )
        .await;
        let (_, second) = call(
            &app,
            Method::POST,
            "/api/style-templates",
            Some(json!({ "name": "Staff", "instructions": "Bullet points." })),
        )
        .await;
        let first_id = first["data"]["id"].as_i64().unwrap();
        let second_id = second["data"]["id"].as_i64().unwrap();

        let (_, active) = call(&app, Method::GET, "/api/style-templates/active", None).await;
        assert_eq!(active["data"]["id"], first_id);

        let uri = format!("/api/style-templates/{}/activate", second_id);
        let (status, activated) = call(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(activated["data"]["is_active"], true);

        let (_, active) = call(&app, Method::GET, "/api/style-templates/active", None).await;
        assert_eq!(active["data"]["id"], second_id);

        let (status, _) = call(&app, Method::POST, "/api/style-templates/999/activate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_import_upload_and_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));
        let csv = "Year,Month,Program,Units Leased,HAP Amount\n2024,1,HCV,1000,950000\n2024,2,HCV,1010,960000";

        let (status, bytes) = send(&app, multipart_request("/api/import/hap-expenditures", "hap.csv", csv)).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["data"]["rows_imported"], 2);
        assert_eq!(json["data"]["rows_failed"], 0);

        let (status, bytes) = send(&app, multipart_request("/api/import/hap-expenditures", "again.csv", csv)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "CONFLICT");

        let (status, _) = send(&app, multipart_request("/api/import/users", "users.csv", csv)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, batches) = call(&app, Method::GET, "/api/imports", None).await;
        assert_eq!(batches["data"].as_array().unwrap().len(), 1);

        let (status, fields) = call(&app, Method::GET, "/api/import/fields/hcv-utilization", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(fields["data"]["fields"].as_array().unwrap().len() > 3);

        let (_, trend) = call(&app, Method::GET, "/api/dashboard/trend?year=2024", None).await;
        let trend = trend["data"].as_array().unwrap();
        assert_eq!(trend.len(), 12);
        assert_eq!(trend[1]["hap_spent"], 960000.0);
    }

    #[tokio::test]
    async fn test_dashboard_summary_defaults_to_latest_year() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        for (year, amount) in [(2023, 10_000_000.0), (2024, 12_000_000.0)] {
            let (status, _) = call(
                &app,
                Method::POST,
                "/api/budget-authorities",
                Some(json!({ "fiscal_year": year, "hap_budget_authority": amount, "effective_date": format!("{}-01-01", year) })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, summary) = call(&app, Method::GET, "/api/dashboard/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["data"]["year"], 2024);
        assert_eq!(summary["data"]["hap_budget_authority"], 12_000_000.0);

        let (_, summary) = call(&app, Method::GET, "/api/dashboard/summary?year=2023", None).await;
        assert_eq!(summary["data"]["hap_budget_authority"], 10_000_000.0);

        let (_, years) = call(&app, Method::GET, "/api/dashboard/years", None).await;
        assert_eq!(years["data"], json!([2024, 2023]));

        let (status, _) = call(&app, Method::GET, "/api/dashboard/summary?year=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_without_llm_streams_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/reports/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "report_type": "executive_summary", "year": 2024 }).to_string()))
            .unwrap();
        let (status, bytes) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let body = String::from_utf8(bytes).unwrap();
        assert!(body.contains("event: error"));
        assert!(body.contains("OPENAI_API_KEY"));
        assert!(!body.contains("event: done"));

        let (_, reports) = call(&app, Method::GET, "/api/reports", None).await;
        assert!(reports["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_custom_without_prompt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(dir.path()));

        let (status, json) = call(
            &app,
            Method::POST,
            "/api/reports/generate",
            Some(json!({ "report_type": "custom", "year": 2024 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_report_get_pdf_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let id = {
            let conn = state.db().unwrap();
            let request = GenerateRequest {
                report_type: ReportType::Reserves,
                year: Some(2024),
                title: None,
                custom_prompt: None,
            };
            let prepared = report::prepare_report(&conn, &request).unwrap();
            let saved = report::save_report(&conn, &prepared, "Reserves held steady all year.", "gpt-4o-mini", "test")
                .unwrap();
            saved.meta.id.unwrap()
        };
        let app = build_router(state);

        let (status, json) = call(&app, Method::GET, &format!("/api/reports/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["report_type"], "reserves");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/reports/{}/pdf", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment;"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        let (status, _) = call(&app, Method::DELETE, &format!("/api/reports/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &format!("/api/reports/{}/pdf", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
