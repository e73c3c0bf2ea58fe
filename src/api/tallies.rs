//! Tally types and demerits issued to students.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, tally_rupees, CreateTallyTypeRequest, IssueToStudentsRequest,
    IssueToStudentsResponse, StudentTally, StudentTallyDetail, StudentTallyQuery, TallySummary,
    TallyType, UpdateTallyTypeRequest, User,
};
use crate::utils::timestamp;
use crate::AppState;

use super::activity::record_activity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::students::resolve_students;
use super::validation::{
    clean_optional, validate_catalog_name, validate_description, validate_student_ids,
    validate_tally_value,
};

async fn find_tally_type(state: &AppState, id: &str) -> Result<TallyType, ApiError> {
    sqlx::query_as::<_, TallyType>("SELECT * FROM tally_types WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Tally type not found"))
}

pub async fn list_tally_types(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TallyType>>, ApiError> {
    let types = sqlx::query_as::<_, TallyType>("SELECT * FROM tally_types ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(types))
}

pub async fn create_tally_type(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateTallyTypeRequest>,
) -> Result<(StatusCode, Json<TallyType>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_catalog_name(&req.name));
    errors.check("value", validate_tally_value(req.value));
    errors.check("description", validate_description(&req.description));
    errors.finish()?;

    let now = timestamp();
    let tally_type = TallyType {
        id: Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        value: req.value,
        description: clean_optional(req.description),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO tally_types (id, name, value, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&tally_type.id)
    .bind(&tally_type.name)
    .bind(tally_type.value)
    .bind(&tally_type.description)
    .bind(&tally_type.created_at)
    .bind(&tally_type.updated_at)
    .execute(&state.db)
    .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::TALLY_TYPE_CREATE,
        resource_types::TALLY_TYPE,
        Some(&tally_type.id),
        Some(serde_json::json!({ "name": tally_type.name, "value": tally_type.value })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(tally_type)))
}

pub async fn update_tally_type(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateTallyTypeRequest>,
) -> Result<Json<TallyType>, ApiError> {
    let existing = find_tally_type(&state, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_catalog_name(name));
    }
    if let Some(value) = req.value {
        errors.check("value", validate_tally_value(value));
    }
    errors.check("description", validate_description(&req.description));
    errors.finish()?;

    let tally_type = TallyType {
        name: req.name.map(|n| n.trim().to_string()).unwrap_or(existing.name),
        value: req.value.unwrap_or(existing.value),
        description: match req.description {
            Some(d) => clean_optional(Some(d)),
            None => existing.description,
        },
        updated_at: timestamp(),
        ..existing
    };

    sqlx::query(
        "UPDATE tally_types SET name = ?, value = ?, description = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&tally_type.name)
    .bind(tally_type.value)
    .bind(&tally_type.description)
    .bind(&tally_type.updated_at)
    .bind(&id)
    .execute(&state.db)
    .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::TALLY_TYPE_UPDATE,
        resource_types::TALLY_TYPE,
        Some(&id),
        Some(serde_json::json!({ "name": tally_type.name, "value": tally_type.value })),
    )
    .await;

    Ok(Json(tally_type))
}

pub async fn delete_tally_type(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tally_type = find_tally_type(&state, &id).await?;

    let issued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM student_tallies WHERE tally_type_id = ?")
            .bind(&id)
            .fetch_one(&state.db)
            .await?;
    if issued > 0 {
        return Err(ApiError::conflict(format!(
            "Tally type has been issued {} time(s); revoke those first",
            issued
        )));
    }

    sqlx::query("DELETE FROM tally_types WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::TALLY_TYPE_DELETE,
        resource_types::TALLY_TYPE,
        Some(&id),
        Some(serde_json::json!({ "name": tally_type.name })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Issue a tally to each selected student, exactly once per distinct id
pub async fn issue_tally(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<IssueToStudentsRequest>,
) -> Result<(StatusCode, Json<IssueToStudentsResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("student_ids", validate_student_ids(&req.student_ids));
    errors.check("remarks", validate_description(&req.remarks));
    errors.finish()?;

    let tally_type = find_tally_type(&state, &id).await?;
    let remarks = clean_optional(req.remarks);
    let now = timestamp();

    let mut tx = state.db.begin().await?;
    let student_ids = resolve_students(&mut tx, &req.student_ids).await?;

    let mut ids = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        let row_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO student_tallies (id, student_id, tally_type_id, remarks, issued_by, issued_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row_id)
        .bind(student_id)
        .bind(&tally_type.id)
        .bind(&remarks)
        .bind(&user.id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        ids.push(row_id);
    }
    tx.commit().await?;

    tracing::info!(tally_type = %tally_type.name, students = ids.len(), "Tally issued");
    record_activity(
        &state,
        &user,
        &headers,
        actions::TALLY_ISSUE,
        resource_types::TALLY,
        Some(&tally_type.id),
        Some(serde_json::json!({ "name": tally_type.name, "student_ids": student_ids })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(IssueToStudentsResponse {
            issued: ids.len(),
            ids,
        }),
    ))
}

/// List issued tallies
pub async fn list_tallies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentTallyQuery>,
) -> Result<Json<Vec<StudentTallyDetail>>, ApiError> {
    let rows = sqlx::query_as::<_, StudentTallyDetail>(
        r#"
        SELECT st.id, st.student_id, s.admission_number, s.name AS student_name,
               st.tally_type_id, t.name AS tally_name, t.value, st.remarks,
               st.issued_by, st.issued_at
        FROM student_tallies st
        JOIN students s ON s.id = st.student_id
        JOIN tally_types t ON t.id = st.tally_type_id
        WHERE (?1 IS NULL OR st.student_id = ?1)
        ORDER BY st.issued_at DESC, st.id
        "#,
    )
    .bind(&query.student_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

/// Revoke an issued tally
pub async fn delete_tally(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existing = sqlx::query_as::<_, StudentTally>("SELECT * FROM student_tallies WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Tally not found"))?;

    sqlx::query("DELETE FROM student_tallies WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::TALLY_REVOKE,
        resource_types::TALLY,
        Some(&id),
        Some(serde_json::json!({
            "student_id": existing.student_id,
            "tally_type_id": existing.tally_type_id,
        })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Per-student tally totals, highest first
pub async fn tally_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TallySummary>>, ApiError> {
    let rows: Vec<(String, String, String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT s.id, s.admission_number, s.name, COUNT(st.id), COALESCE(SUM(t.value), 0)
        FROM students s
        JOIN student_tallies st ON st.student_id = s.id
        JOIN tally_types t ON t.id = st.tally_type_id
        GROUP BY s.id, s.admission_number, s.name
        ORDER BY 5 DESC, s.name
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let rate = state.config.tally.rupees_per_unit;
    let summary = rows
        .into_iter()
        .map(|(student_id, admission_number, name, count, units)| TallySummary {
            student_id,
            admission_number,
            name,
            count,
            units,
            rupees: tally_rupees(units, rate),
        })
        .collect();

    Ok(Json(summary))
}
