//! Fine catalog and fines issued to students.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, CreateFineRequest, Fine, FineStatus, IssueToStudentsRequest,
    IssueToStudentsResponse, StudentFine, StudentFineDetail, StudentFineQuery, UpdateFineRequest,
    UpdateStudentFineRequest, User,
};
use crate::utils::timestamp;
use crate::AppState;

use super::activity::record_activity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::students::resolve_students;
use super::validation::{
    clean_optional, validate_amount, validate_catalog_name, validate_description,
    validate_student_ids,
};

async fn find_fine(state: &AppState, id: &str) -> Result<Fine, ApiError> {
    sqlx::query_as::<_, Fine>("SELECT * FROM fines WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Fine not found"))
}

/// List the fine catalog
pub async fn list_fines(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Fine>>, ApiError> {
    let fines = sqlx::query_as::<_, Fine>("SELECT * FROM fines ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(fines))
}

pub async fn create_fine(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateFineRequest>,
) -> Result<(StatusCode, Json<Fine>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_catalog_name(&req.name));
    errors.check("amount", validate_amount(req.amount));
    errors.check("description", validate_description(&req.description));
    errors.finish()?;

    let now = timestamp();
    let fine = Fine {
        id: Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        amount: req.amount,
        description: clean_optional(req.description),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO fines (id, name, amount, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&fine.id)
    .bind(&fine.name)
    .bind(fine.amount)
    .bind(&fine.description)
    .bind(&fine.created_at)
    .bind(&fine.updated_at)
    .execute(&state.db)
    .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::FINE_CREATE,
        resource_types::FINE,
        Some(&fine.id),
        Some(serde_json::json!({ "name": fine.name, "amount": fine.amount })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(fine)))
}

/// Update a catalog entry. Fines already issued keep their amount.
pub async fn update_fine(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateFineRequest>,
) -> Result<Json<Fine>, ApiError> {
    let existing = find_fine(&state, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_catalog_name(name));
    }
    if let Some(amount) = req.amount {
        errors.check("amount", validate_amount(amount));
    }
    errors.check("description", validate_description(&req.description));
    errors.finish()?;

    let fine = Fine {
        name: req.name.map(|n| n.trim().to_string()).unwrap_or(existing.name),
        amount: req.amount.unwrap_or(existing.amount),
        description: match req.description {
            Some(d) => clean_optional(Some(d)),
            None => existing.description,
        },
        updated_at: timestamp(),
        ..existing
    };

    sqlx::query("UPDATE fines SET name = ?, amount = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&fine.name)
        .bind(fine.amount)
        .bind(&fine.description)
        .bind(&fine.updated_at)
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::FINE_UPDATE,
        resource_types::FINE,
        Some(&id),
        Some(serde_json::json!({ "name": fine.name, "amount": fine.amount })),
    )
    .await;

    Ok(Json(fine))
}

/// Delete a catalog entry that was never issued
pub async fn delete_fine(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let fine = find_fine(&state, &id).await?;

    let issued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student_fines WHERE fine_id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    if issued > 0 {
        return Err(ApiError::conflict(format!(
            "Fine has been issued {} time(s); revoke those first",
            issued
        )));
    }

    sqlx::query("DELETE FROM fines WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::FINE_DELETE,
        resource_types::FINE,
        Some(&id),
        Some(serde_json::json!({ "name": fine.name })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Issue a fine to each selected student, exactly once per distinct id
pub async fn issue_fine(
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

    let fine = find_fine(&state, &id).await?;
    let remarks = clean_optional(req.remarks);
    let now = timestamp();

    let mut tx = state.db.begin().await?;
    let student_ids = resolve_students(&mut tx, &req.student_ids).await?;

    let mut ids = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        let row_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO student_fines (id, student_id, fine_id, amount, remarks, issued_by, status, issued_at)
            VALUES (?, ?, ?, ?, ?, ?, 'unpaid', ?)
            "#,
        )
        .bind(&row_id)
        .bind(student_id)
        .bind(&fine.id)
        .bind(fine.amount)
        .bind(&remarks)
        .bind(&user.id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        ids.push(row_id);
    }
    tx.commit().await?;

    tracing::info!(fine = %fine.name, students = ids.len(), "Fine issued");
    record_activity(
        &state,
        &user,
        &headers,
        actions::FINE_ISSUE,
        resource_types::FINE,
        Some(&fine.id),
        Some(serde_json::json!({ "name": fine.name, "student_ids": student_ids })),
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

/// List issued fines
pub async fn list_student_fines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentFineQuery>,
) -> Result<Json<Vec<StudentFineDetail>>, ApiError> {
    let rows = sqlx::query_as::<_, StudentFineDetail>(
        r#"
        SELECT sf.id, sf.student_id, s.admission_number, s.name AS student_name,
               sf.fine_id, f.name AS fine_name, sf.amount, sf.remarks, sf.issued_by,
               sf.status, sf.issued_at, sf.paid_at
        FROM student_fines sf
        JOIN students s ON s.id = sf.student_id
        JOIN fines f ON f.id = sf.fine_id
        WHERE (?1 IS NULL OR sf.student_id = ?1)
          AND (?2 IS NULL OR sf.status = ?2)
        ORDER BY sf.issued_at DESC, sf.id
        "#,
    )
    .bind(&query.student_id)
    .bind(query.status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

/// Mark an issued fine paid or unpaid
pub async fn update_student_fine(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateStudentFineRequest>,
) -> Result<Json<StudentFine>, ApiError> {
    let existing = sqlx::query_as::<_, StudentFine>("SELECT * FROM student_fines WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Student fine not found"))?;

    let (status, paid_at, action) = if req.paid {
        (
            FineStatus::Paid,
            existing.paid_at.clone().or_else(|| Some(timestamp())),
            actions::FINE_PAID,
        )
    } else {
        (FineStatus::Unpaid, None, actions::FINE_UNPAID)
    };

    sqlx::query("UPDATE student_fines SET status = ?, paid_at = ? WHERE id = ?")
        .bind(status)
        .bind(&paid_at)
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        action,
        resource_types::STUDENT_FINE,
        Some(&id),
        Some(serde_json::json!({ "student_id": existing.student_id, "amount": existing.amount })),
    )
    .await;

    Ok(Json(StudentFine {
        status,
        paid_at,
        ..existing
    }))
}

/// Revoke an issued fine
pub async fn delete_student_fine(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existing = sqlx::query_as::<_, StudentFine>("SELECT * FROM student_fines WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Student fine not found"))?;

    sqlx::query("DELETE FROM student_fines WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::FINE_REVOKE,
        resource_types::STUDENT_FINE,
        Some(&id),
        Some(serde_json::json!({ "student_id": existing.student_id, "fine_id": existing.fine_id })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
