use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use jobdesk_scheduler::{MemoryLogSink, TaskRegistry, ValidationError};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use super::*;

fn open_auth() -> AuthState {
    AuthState::from_keys("", true).expect("dev auth")
}

fn state_with(pool: PgPool) -> AppState {
    let scheduler = jobdesk_scheduler::start_engine(
        Arc::new(TaskRegistry::with_builtin_tasks()),
        Arc::new(MemoryLogSink::new()),
    )
    .expect("engine");
    AppState { pool, scheduler }
}

/// State over a pool that never connects; only for requests rejected before
/// any query runs.
fn offline_state() -> AppState {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://jobdesk@127.0.0.1:1/jobdesk")
        .expect("lazy pool");
    state_with(pool)
}

fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json parse")
}

// -------------------------------------------------------------------------
// Helpers (no DB)
// -------------------------------------------------------------------------

#[test]
fn api_error_codes_map_to_status() {
    let cases = [
        ("validation_error", StatusCode::BAD_REQUEST),
        ("not_found", StatusCode::NOT_FOUND),
        ("service_unavailable", StatusCode::SERVICE_UNAVAILABLE),
        ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (code, status) in cases {
        let response = ApiError::new("req-1", code, "message").into_response();
        assert_eq!(response.status(), status, "{code}");
    }
}

#[test]
fn normalize_page_applies_defaults_and_bounds() {
    let page = normalize_page(None, None);
    assert_eq!((page.number, page.size), (1, DEFAULT_PAGE_SIZE));

    let page = normalize_page(Some(0), Some(10_000));
    assert_eq!((page.number, page.size), (1, MAX_PAGE_SIZE));

    let page = normalize_page(Some(3), Some(25));
    assert_eq!((page.number, page.size), (3, 25));
}

#[test]
fn parse_ids_accepts_comma_separated_list() {
    assert_eq!(parse_ids("r", "3, 7,9").expect("ids"), vec![3, 7, 9]);
    assert_eq!(parse_ids("r", "1,x").unwrap_err().error.code, "validation_error");
    assert_eq!(parse_ids("r", " , ").unwrap_err().error.code, "validation_error");
}

#[test]
fn code_value_accepts_strings_and_numbers() {
    let text: CodeValue = serde_json::from_str("\"1\"").expect("text code");
    let number: CodeValue = serde_json::from_str("1").expect("numeric code");

    assert_eq!(
        text.parse::<jobdesk_core::JobStatus>("r", "status").expect("parse"),
        jobdesk_core::JobStatus::Disabled
    );
    assert_eq!(
        number.parse::<jobdesk_core::JobStatus>("r", "status").expect("parse"),
        jobdesk_core::JobStatus::Disabled
    );

    let bad: CodeValue = serde_json::from_str("\"7\"").expect("code");
    let err = bad
        .parse::<jobdesk_core::MisfirePolicy>("r", "misfire_policy")
        .unwrap_err();
    assert_eq!(err.error.code, "validation_error");
    assert!(err.error.message.starts_with("misfire_policy"));
}

#[test]
fn scheduler_validation_errors_are_bad_requests() {
    let err = SchedulerError::Validation(ValidationError::Cron {
        expression: "* *".to_string(),
        reason: "too few fields".to_string(),
    });
    let api = map_scheduler_error("r", &err);
    assert_eq!(api.error.code, "validation_error");
    assert!(api.error.message.contains("too few fields"));

    let api = map_scheduler_error("r", &SchedulerError::NotRunning);
    assert_eq!(api.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
}

// -------------------------------------------------------------------------
// Routes rejected before touching the database
// -------------------------------------------------------------------------

#[tokio::test]
async fn create_job_rejects_invalid_cron() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            &serde_json::json!({
                "job_name": "bad cron",
                "invoke_target": "sample_task.no_params",
                "cron_expression": "* * * * *",
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(json["error"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("cron")));
}

#[tokio::test]
async fn create_job_rejects_malformed_target() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            &serde_json::json!({
                "job_name": "bad target",
                "invoke_target": "no_dot_here",
                "cron_expression": "0 * * * * ?",
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "validation_error");
}

async fn create_job_error_code(body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request("POST", "/api/v1/jobs", &body))
        .await
        .expect("response");
    let status = response.status();
    (status, body_json(response).await["error"]["code"].clone())
}

#[tokio::test]
async fn create_job_rejects_target_longer_than_column() {
    // Syntactically valid, but one character over the column.
    let target = format!("sample_task.with_params('{}')", "x".repeat(500));
    let (status, code) = create_job_error_code(serde_json::json!({
        "job_name": "long target",
        "invoke_target": target,
        "cron_expression": "0 * * * * ?",
    }))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "validation_error");
}

#[tokio::test]
async fn create_job_rejects_cron_longer_than_column() {
    let cron = format!("0 0 12 * *{}?", " ".repeat(300));
    let (status, code) = create_job_error_code(serde_json::json!({
        "job_name": "long cron",
        "invoke_target": "sample_task.no_params",
        "cron_expression": cron,
    }))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "validation_error");
}

#[tokio::test]
async fn create_job_rejects_deeply_nested_target() {
    let target = format!("sample_task.with_params({})", "[".repeat(400));
    let (status, code) = create_job_error_code(serde_json::json!({
        "job_name": "nested target",
        "invoke_target": target,
        "cron_expression": "0 * * * * ?",
    }))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "validation_error");
}

#[tokio::test]
async fn create_job_rejects_remark_longer_than_column() {
    let (status, code) = create_job_error_code(serde_json::json!({
        "job_name": "long remark",
        "invoke_target": "sample_task.no_params",
        "cron_expression": "0 * * * * ?",
        "remark": "r".repeat(501),
    }))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "validation_error");
}

#[tokio::test]
async fn update_job_rejects_target_longer_than_column() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/v1/jobs/1",
            &serde_json::json!({
                "invoke_target": format!("sample_task.with_params('{}')", "x".repeat(500)),
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn create_job_rejects_unknown_policy_code() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            &serde_json::json!({
                "job_name": "bad policy",
                "invoke_target": "sample_task.no_params",
                "cron_expression": "0 * * * * ?",
                "concurrent": 5,
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_numeric_job_id_is_rejected() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/v1/jobs/abc/status",
            &serde_json::json!({ "status": "0" }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_with_bad_id_list_is_rejected() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(empty_request("DELETE", "/api/v1/jobs/1,two"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_log_list_rejects_unknown_status() {
    let app = build_app(offline_state(), open_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/job-logs?status=9")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-42")
    );
    assert_eq!(body_json(response).await["meta"]["request_id"], "req-42");
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let auth = AuthState::from_keys("secret", false).expect("auth");
    let app = build_app(offline_state(), auth);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/v1/jobs"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/jobs/x")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// -------------------------------------------------------------------------
// Full round trips (require DATABASE_URL)
// -------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn created_enabled_job_is_scheduled(pool: sqlx::PgPool) {
    let state = state_with(pool);
    let scheduler = state.scheduler.clone();
    let app = build_app(state, open_auth());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            &serde_json::json!({
                "job_name": "ticker",
                "invoke_target": "sample_task.with_params('ry')",
                "cron_expression": "0/10 * * * * ?",
                "status": "0",
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_i64().expect("job_id");
    assert_eq!(json["data"]["job_group"], "DEFAULT");
    assert!(json["data"]["next_fire_time"].is_string());
    assert!(scheduler.is_scheduled(job_id));

    let response = app
        .oneshot(empty_request("GET", "/api/v1/jobs?job_name=tick"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["items"][0]["job_id"], job_id);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn disabling_a_job_removes_its_entry(pool: sqlx::PgPool) {
    let state = state_with(pool);
    let scheduler = state.scheduler.clone();
    let app = build_app(state, open_auth());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            &serde_json::json!({
                "job_name": "pausable",
                "invoke_target": "sample_task.no_params",
                "cron_expression": "0 0 3 * * ?",
            }),
        ))
        .await
        .expect("response");
    let job_id = body_json(response).await["data"]["job_id"]
        .as_i64()
        .expect("job_id");
    assert!(scheduler.is_scheduled(job_id));

    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/jobs/{job_id}/status"),
            &serde_json::json!({ "status": 1 }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "1");
    assert!(json["data"]["next_fire_time"].is_null());
    assert!(!scheduler.is_scheduled(job_id));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn run_and_delete_round_trip(pool: sqlx::PgPool) {
    let row = jobdesk_db::create_job(
        &pool,
        &jobdesk_db::NewJob {
            job_name: "manual",
            job_group: "DEFAULT",
            invoke_target: "sample_task.no_params",
            cron_expression: "0 0 3 * * ?",
            misfire_policy: jobdesk_core::MisfirePolicy::Discard,
            concurrent: jobdesk_core::ConcurrencyPolicy::Forbid,
            status: jobdesk_core::JobStatus::Disabled,
            remark: "",
        },
        "test",
    )
    .await
    .expect("create job");

    let app = build_app(state_with(pool), open_auth());

    let response = app
        .clone()
        .oneshot(empty_request("POST", &format!("/api/v1/jobs/{}/run", row.job_id)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["dispatched"], true);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/v1/jobs/{}", row.job_id)))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["data"]["deleted"], 1);

    let response = app
        .oneshot(empty_request("GET", &format!("/api/v1/jobs/{}", row.job_id)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
