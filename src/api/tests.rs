use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use super::create_router;
use crate::config::Config;
use crate::AppState;

const ADMIN_TOKEN: &str = "test-admin-token";

async fn app() -> (Router, Arc<AppState>) {
    let db = crate::db::connect("sqlite::memory:").await.unwrap();
    let mut config = Config::default();
    config.auth.admin_token = ADMIN_TOKEN.to_string();
    config.leave.enabled = false;
    let state = Arc::new(AppState::new(config, db));
    (create_router(state.clone()), state)
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn admin(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call(router, method, uri, Some(ADMIN_TOKEN), body).await
}

async fn create_student(router: &Router, admission_number: &str, name: &str) -> String {
    let (status, body) = admin(
        router,
        Method::POST,
        "/api/students",
        Some(json!({ "admission_number": admission_number, "name": name, "class_name": "10A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn count(state: &AppState, table: &str, student_id: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE student_id = ?", table))
        .bind(student_id)
        .fetch_one(&state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public_and_api_is_not() {
    let (router, _) = app().await;

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = call(&router, Method::GET, "/api/students", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&router, Method::GET, "/api/students", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_student_round_trip_and_duplicates() {
    let (router, state) = app().await;

    let (status, created) = admin(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({
            "admission_number": "2024/118",
            "name": "Asha Menon",
            "locker_number": "L-12",
            "class_name": "9B",
            "roll_number": "14",
            "phone_name": "Redmi Note",
            "special_pass": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap();

    let (status, detail) = admin(&router, Method::GET, &format!("/api/students/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    for field in [
        "admission_number",
        "name",
        "locker_number",
        "class_name",
        "roll_number",
        "phone_name",
        "special_pass",
    ] {
        assert_eq!(detail[field], created[field], "{}", field);
    }
    assert_eq!(detail["phone_status"]["status"], "in");
    assert_eq!(detail["open_passes"], json!([]));

    let (status, body) = admin(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({ "admission_number": "2024/118", "name": "Someone Else" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = admin(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({ "admission_number": "2024/119", "name": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["name"].is_array());

    let (_, list) = admin(&router, Method::GET, "/api/students?q=asha", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    // A write invalidates the cached listing
    create_student(&router, "2024/120", "Asha Varghese").await;
    let (_, list) = admin(&router, Method::GET, "/api/students?q=asha", None).await;
    assert_eq!(list.as_array().unwrap().len(), 2);

    let (status, updated) = admin(
        &router,
        Method::PUT,
        &format!("/api/students/{}", id),
        Some(json!({ "locker_number": "", "name": "Asha M." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Asha M.");
    assert!(updated["locker_number"].is_null());
    assert_eq!(updated["class_name"], "9B");

    let (status, _) = admin(
        &router,
        Method::PUT,
        &format!("/api/students/{}", id),
        Some(json!({ "admission_number": "2024/120" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert!(state.student_cache.is_empty());
}

#[tokio::test]
async fn test_bulk_import_skips_duplicates() {
    let (router, _) = app().await;
    create_student(&router, "A-1", "Existing").await;

    let (status, body) = admin(
        &router,
        Method::POST,
        "/api/students/bulk",
        Some(json!({ "students": [
            { "admission_number": "A-1", "name": "Existing again" },
            { "admission_number": "A-2", "name": "New" },
            { "admission_number": "A-2", "name": "New twice" },
            { "admission_number": "A-3", "name": "Also new" }
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert_eq!(body["skipped"], json!(["A-1", "A-2"]));

    let (_, list) = admin(&router, Method::GET, "/api/students", None).await;
    assert_eq!(list.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_login_sessions_and_roles() {
    let (router, _) = app().await;

    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({ "username": "mentor1", "password": "secret-pass", "permissions": ["phone_pass"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({ "username": "mentor1", "password": "another-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "mentor1", "password": "wrong-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, login) = call(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "mentor1", "password": "secret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["user"]["role"], "mentor");
    assert_eq!(login["user"]["permissions"], json!(["phone_pass"]));
    assert!(login["user"].get("password_hash").is_none());
    let token = login["token"].as_str().unwrap().to_string();

    let (status, me) = call(&router, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "mentor1");

    // Mentors work with students but cannot manage staff
    let (status, _) = call(&router, Method::GET, "/api/students", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&router, Method::GET, "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&router, Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&router, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_fine_issued_once_per_selected_student() {
    let (router, state) = app().await;
    let a = create_student(&router, "F-1", "Anil").await;
    let b = create_student(&router, "F-2", "Bina").await;
    let c = create_student(&router, "F-3", "Chitra").await;

    let (status, fine) = admin(
        &router,
        Method::POST,
        "/api/fines",
        Some(json!({ "name": "Late return", "amount": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let fine_id = fine["id"].as_str().unwrap();

    let (status, _) = admin(
        &router,
        Method::POST,
        &format!("/api/fines/{}/issue", fine_id),
        Some(json!({ "student_ids": [a, "no-such-student"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&state, "student_fines", &a).await, 0);

    let (status, issued) = admin(
        &router,
        Method::POST,
        &format!("/api/fines/{}/issue", fine_id),
        Some(json!({ "student_ids": [a, b, c, a], "remarks": "Gate closed at 9" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(issued["issued"], 3);
    for id in [&a, &b, &c] {
        assert_eq!(count(&state, "student_fines", id).await, 1);
    }

    let (_, unpaid) = admin(&router, Method::GET, "/api/student-fines?status=unpaid", None).await;
    assert_eq!(unpaid.as_array().unwrap().len(), 3);
    let row_id = unpaid[0]["id"].as_str().unwrap();

    let (status, paid) = admin(
        &router,
        Method::PATCH,
        &format!("/api/student-fines/{}", row_id),
        Some(json!({ "paid": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "paid");
    assert!(paid["paid_at"].is_string());

    let (status, _) = admin(&router, Method::DELETE, &format!("/api/fines/{}", fine_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_tally_summary_in_rupees() {
    let (router, _) = app().await;
    let a = create_student(&router, "T-1", "Dev").await;

    let (_, tally_type) = admin(
        &router,
        Method::POST,
        "/api/tally-types",
        Some(json!({ "name": "Uniform", "value": 2 })),
    )
    .await;
    let type_id = tally_type["id"].as_str().unwrap();

    for _ in 0..2 {
        let (status, _) = admin(
            &router,
            Method::POST,
            &format!("/api/tally-types/{}/issue", type_id),
            Some(json!({ "student_ids": [a] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, summary) = admin(&router, Method::GET, "/api/tallies/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary[0]["count"], 2);
    assert_eq!(summary[0]["units"], 4);
    assert_eq!(summary[0]["rupees"], 40);

    let (_, detail) = admin(&router, Method::GET, &format!("/api/students/{}", a), None).await;
    assert_eq!(detail["tally_rupees"], 40);
}

#[tokio::test]
async fn test_phone_pass_lifecycle_mirrors_phone_status() {
    let (router, _) = app().await;
    let student = create_student(&router, "P-1", "Esha").await;

    let (status, pass) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "phone", "purpose": "Call home" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pass["status"], "active");
    let pass_id = pass["id"].as_str().unwrap().to_string();

    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "phone", "purpose": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // A gate pass is independent of the phone pass
    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "gate", "purpose": "Dentist" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = admin(&router, Method::POST, &format!("/api/passes/{}/return", pass_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, out) = admin(&router, Method::POST, &format!("/api/passes/{}/out", pass_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["status"], "out");
    assert!(out["out_at"].is_string());

    let (_, phones) = admin(&router, Method::GET, "/api/phone-status?status=out", None).await;
    assert_eq!(phones.as_array().unwrap().len(), 1);
    assert_eq!(phones[0]["pass_id"], pass_id.as_str());

    let (status, returned) = admin(
        &router,
        Method::POST,
        &format!("/api/passes/{}/return", pass_id),
        Some(json!({ "notes": "Screen cracked" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["status"], "completed");
    assert_eq!(returned["close_reason"], "returned");

    let (_, detail) = admin(&router, Method::GET, &format!("/api/students/{}", student), None).await;
    assert_eq!(detail["phone_status"]["status"], "in");
    assert!(detail["phone_status"]["pass_id"].is_null());

    let (_, history) = admin(
        &router,
        Method::GET,
        &format!("/api/phone-history?student_id={}", student),
        None,
    )
    .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    let mut actions: Vec<&str> = history.iter().map(|h| h["action"].as_str().unwrap()).collect();
    actions.sort_unstable();
    assert_eq!(actions, vec!["in", "out"]);
    assert!(history.iter().any(|h| h["notes"] == "Screen cracked"));

    let (status, _) = admin(&router, Method::POST, &format!("/api/passes/{}/out", pass_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The phone slot is free again
    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "phone", "purpose": "Weekend" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_scheduled_pass_starts_pending() {
    let (router, _) = app().await;
    let student = create_student(&router, "S-1", "Farah").await;
    let later = (Utc::now() + Duration::hours(3)).to_rfc3339();

    let (status, pass) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "gate", "purpose": "Exam", "scheduled_for": later })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pass["status"], "pending");

    let (status, cancelled) = admin(
        &router,
        Method::POST,
        &format!("/api/passes/{}/cancel", pass["id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["close_reason"], "cancelled");
}

#[tokio::test]
async fn test_student_delete_leaves_no_orphans() {
    let (router, state) = app().await;
    let student = create_student(&router, "D-1", "Gopal").await;
    let other = create_student(&router, "D-2", "Hema").await;

    let (_, pass) = admin(
        &router,
        Method::POST,
        "/api/passes",
        Some(json!({ "student_id": student, "kind": "phone", "purpose": "Call" })),
    )
    .await;
    admin(&router, Method::POST, &format!("/api/passes/{}/out", pass["id"].as_str().unwrap()), None).await;

    let (_, fine) = admin(&router, Method::POST, "/api/fines", Some(json!({ "name": "Noise", "amount": 20 }))).await;
    admin(
        &router,
        Method::POST,
        &format!("/api/fines/{}/issue", fine["id"].as_str().unwrap()),
        Some(json!({ "student_ids": [student, other] })),
    )
    .await;

    let (_, tally_type) = admin(&router, Method::POST, "/api/tally-types", Some(json!({ "name": "Late", "value": 1 }))).await;
    admin(
        &router,
        Method::POST,
        &format!("/api/tally-types/{}/issue", tally_type["id"].as_str().unwrap()),
        Some(json!({ "student_ids": [student] })),
    )
    .await;

    let (status, _) = admin(
        &router,
        Method::POST,
        "/api/monthly-leaves",
        Some(json!({
            "title": "Diwali",
            "start_date": "2030-10-20", "start_time": "08:00",
            "end_date": "2030-10-25", "end_time": "18:00",
            "excluded_student_ids": [student]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = admin(&router, Method::DELETE, &format!("/api/students/{}", student), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for table in [
        "phone_history",
        "phone_status",
        "pass_grants",
        "student_fines",
        "student_tallies",
        "leave_exclusions",
    ] {
        assert_eq!(count(&state, table, &student).await, 0, "{}", table);
    }
    assert_eq!(count(&state, "student_fines", &other).await, 1);

    let (status, _) = admin(&router, Method::GET, &format!("/api/students/{}", student), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = admin(&router, Method::DELETE, &format!("/api/students/{}", student), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monthly_leave_run_grants_passes() {
    let (router, state) = app().await;
    let included = create_student(&router, "M-1", "Indu").await;
    let excluded = create_student(&router, "M-2", "Jai").await;

    let local = Utc::now().with_timezone(&state.config.leave.offset());
    let start = local - Duration::hours(1);
    let end = local + Duration::days(2);

    let (status, leave) = admin(
        &router,
        Method::POST,
        "/api/monthly-leaves",
        Some(json!({
            "title": "March leave",
            "start_date": start.format("%Y-%m-%d").to_string(),
            "start_time": start.format("%H:%M").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
            "end_time": end.format("%H:%M").to_string(),
            "excluded_student_ids": [excluded]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(leave["exclusions"].as_array().unwrap().len(), 1);
    let leave_id = leave["id"].as_str().unwrap().to_string();

    let (status, run) = admin(&router, Method::POST, "/api/monthly-leaves/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["leaves_activated"], 1);
    assert_eq!(run["passes_granted"], 2);

    let (_, passes) = admin(
        &router,
        Method::GET,
        &format!("/api/passes?student_id={}&open=true", included),
        None,
    )
    .await;
    let passes = passes.as_array().unwrap();
    assert_eq!(passes.len(), 2);
    assert!(passes.iter().all(|p| p["leave_id"] == leave_id.as_str()));
    assert_eq!(count(&state, "pass_grants", &excluded).await, 0);

    // Started leaves are frozen
    let (status, _) = admin(
        &router,
        Method::PUT,
        &format!("/api/monthly-leaves/{}", leave_id),
        Some(json!({ "title": "Renamed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = admin(&router, Method::DELETE, &format!("/api/monthly-leaves/{}", leave_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, status_body) = admin(&router, Method::GET, "/api/monthly-leaves/activator", None).await;
    assert_eq!(status_body["last_run"]["passes_granted"], 2);
    assert_eq!(status_body["utc_offset_minutes"], 330);
}

#[tokio::test]
async fn test_leave_window_must_end_after_start() {
    let (router, _) = app().await;
    let (status, body) = admin(
        &router,
        Method::POST,
        "/api/monthly-leaves",
        Some(json!({
            "title": "Backwards",
            "start_date": "2030-03-10", "start_time": "18:00",
            "end_date": "2030-03-10", "end_time": "08:00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_writes_are_recorded_in_activity_log() {
    let (router, _) = app().await;
    let student = create_student(&router, "L-1", "Kiran").await;

    let (status, logs) = admin(
        &router,
        Method::GET,
        "/api/activity-logs?resource_type=student",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["items"][0]["action"], "student.create");
    assert_eq!(logs["items"][0]["resource_id"], student.as_str());
    assert_eq!(logs["items"][0]["username"], "system");
}

#[tokio::test]
async fn test_roll_numbers_sort_numerically() {
    let (router, _) = app().await;
    let students = [("R-10", "Tenth", "10"), ("R-2", "Second", "2"), ("R-1", "First", "1")];
    for (admission, name, roll) in students {
        let (status, body) = admin(
            &router,
            Method::POST,
            "/api/students",
            Some(json!({
                "admission_number": admission,
                "name": name,
                "class_name": "9B",
                "roll_number": roll
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }

    let (_, list) = admin(&router, Method::GET, "/api/students?class_name=9B", None).await;
    let rolls: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["roll_number"].as_str().unwrap())
        .collect();
    assert_eq!(rolls, vec!["1", "2", "10"]);

    let (_, phones) = admin(&router, Method::GET, "/api/phone-status", None).await;
    let names: Vec<&str> = phones
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["First", "Second", "Tenth"]);
}
