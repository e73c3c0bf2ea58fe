//! Monthly leave endpoints.
//!
//! Leaves are editable only while `pending`; once the activator has granted
//! passes the window is fixed.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, local_instant, resource_types, AddExclusionsRequest, CreateLeaveRequest,
    LeaveExclusion, LeaveStatus, MonthlyLeave, MonthlyLeaveDetail, UpdateLeaveRequest, User,
};
use crate::engine::{ActivatorRun, LeaveActivator};
use crate::utils::timestamp;
use crate::AppState;

use super::activity::record_activity;
use super::auth::require_admin;
use super::error::{ApiError, ValidationErrorBuilder};
use super::students::resolve_students;
use super::validation::{
    clean_optional, validate_catalog_name, validate_date, validate_description,
    validate_student_ids, validate_time,
};

#[derive(Debug, Serialize)]
pub struct ActivatorStatus {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub utc_offset_minutes: i32,
    pub last_run: Option<ActivatorRun>,
}

/// Validate a leave window: well-formed fields and end after start
fn validate_window(
    state: &AppState,
    start_date: &str,
    start_time: &str,
    end_date: &str,
    end_time: &str,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("start_date", validate_date(start_date));
    errors.check("start_time", validate_time(start_time));
    errors.check("end_date", validate_date(end_date));
    errors.check("end_time", validate_time(end_time));
    errors.finish()?;

    let offset = state.config.leave.offset();
    let starts_at = local_instant(start_date, start_time, &offset);
    let ends_at = local_instant(end_date, end_time, &offset);
    match (starts_at, ends_at) {
        (Some(start), Some(end)) if end > start => Ok(()),
        _ => Err(ApiError::validation_field(
            "end_date",
            "Leave must end after it starts",
        )),
    }
}

async fn find_leave(state: &AppState, id: &str) -> Result<MonthlyLeave, ApiError> {
    sqlx::query_as::<_, MonthlyLeave>("SELECT * FROM monthly_leaves WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Monthly leave not found"))
}

async fn leave_detail(state: &AppState, leave: MonthlyLeave) -> Result<MonthlyLeaveDetail, ApiError> {
    let exclusions = sqlx::query_as::<_, LeaveExclusion>(
        "SELECT * FROM leave_exclusions WHERE leave_id = ? ORDER BY created_at, student_id",
    )
    .bind(&leave.id)
    .fetch_all(&state.db)
    .await?;

    Ok(MonthlyLeaveDetail { leave, exclusions })
}

fn require_pending(leave: &MonthlyLeave, what: &str) -> Result<(), ApiError> {
    if leave.status == LeaveStatus::Pending {
        Ok(())
    } else {
        Err(ApiError::conflict(format!(
            "Cannot {} a monthly leave that is {}",
            what, leave.status
        )))
    }
}

/// Take the write lock on a leave that must still be pending.
///
/// The activator flips `pending` to `in_progress` in its own transaction, so
/// a leave read outside `tx` may have started since.
async fn claim_pending_leave(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    leave_id: &str,
    now: &str,
) -> Result<(), ApiError> {
    let result = sqlx::query(
        "UPDATE monthly_leaves SET updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(now)
    .bind(leave_id)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Monthly leave has already started"));
    }
    Ok(())
}

/// Insert exclusions for already-resolved student ids, ignoring repeats
async fn insert_exclusions(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    leave_id: &str,
    student_ids: &[String],
    reason: Option<&str>,
    now: &str,
) -> Result<u64, sqlx::Error> {
    let mut added = 0;
    for student_id in student_ids {
        let result = sqlx::query(
            r#"
            INSERT INTO leave_exclusions (id, leave_id, student_id, reason, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(leave_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(leave_id)
        .bind(student_id)
        .bind(reason)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        added += result.rows_affected();
    }
    Ok(added)
}

pub async fn list_leaves(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonthlyLeave>>, ApiError> {
    let leaves = sqlx::query_as::<_, MonthlyLeave>(
        "SELECT * FROM monthly_leaves ORDER BY start_date DESC, start_time DESC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(leaves))
}

pub async fn get_leave(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MonthlyLeaveDetail>, ApiError> {
    let leave = find_leave(&state, &id).await?;
    Ok(Json(leave_detail(&state, leave).await?))
}

pub async fn create_leave(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateLeaveRequest>,
) -> Result<(StatusCode, Json<MonthlyLeaveDetail>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_catalog_name(&req.title));
    errors.check("description", validate_description(&req.description));
    errors.finish()?;
    validate_window(&state, &req.start_date, &req.start_time, &req.end_date, &req.end_time)?;

    let now = timestamp();
    let leave = MonthlyLeave {
        id: Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        description: clean_optional(req.description),
        start_date: req.start_date.trim().to_string(),
        start_time: req.start_time.trim().to_string(),
        end_date: req.end_date.trim().to_string(),
        end_time: req.end_time.trim().to_string(),
        status: LeaveStatus::Pending,
        passes_granted: 0,
        created_by: Some(user.id.clone()),
        activated_at: None,
        completed_at: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO monthly_leaves (id, title, description, start_date, start_time, end_date,
                                    end_time, status, passes_granted, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        "#,
    )
    .bind(&leave.id)
    .bind(&leave.title)
    .bind(&leave.description)
    .bind(&leave.start_date)
    .bind(&leave.start_time)
    .bind(&leave.end_date)
    .bind(&leave.end_time)
    .bind(&leave.created_by)
    .bind(&leave.created_at)
    .bind(&leave.updated_at)
    .execute(&mut *tx)
    .await?;

    if !req.excluded_student_ids.is_empty() {
        let student_ids = resolve_students(&mut tx, &req.excluded_student_ids).await?;
        insert_exclusions(&mut tx, &leave.id, &student_ids, None, &now).await?;
    }
    tx.commit().await?;

    tracing::info!(
        leave = %leave.id,
        title = %leave.title,
        start = %format!("{} {}", leave.start_date, leave.start_time),
        end = %format!("{} {}", leave.end_date, leave.end_time),
        "Monthly leave scheduled"
    );
    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_CREATE,
        resource_types::LEAVE,
        Some(&leave.id),
        Some(serde_json::json!({
            "title": leave.title,
            "excluded": req.excluded_student_ids.len(),
        })),
    )
    .await;

    let detail = leave_detail(&state, leave).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn update_leave(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateLeaveRequest>,
) -> Result<Json<MonthlyLeaveDetail>, ApiError> {
    let existing = find_leave(&state, &id).await?;
    require_pending(&existing, "edit")?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref title) = req.title {
        errors.check("title", validate_catalog_name(title));
    }
    errors.check("description", validate_description(&req.description));
    errors.finish()?;

    let trimmed = |v: Option<String>, old: String| v.map(|s| s.trim().to_string()).unwrap_or(old);
    let leave = MonthlyLeave {
        title: trimmed(req.title, existing.title.clone()),
        description: match req.description {
            Some(d) => clean_optional(Some(d)),
            None => existing.description.clone(),
        },
        start_date: trimmed(req.start_date, existing.start_date.clone()),
        start_time: trimmed(req.start_time, existing.start_time.clone()),
        end_date: trimmed(req.end_date, existing.end_date.clone()),
        end_time: trimmed(req.end_time, existing.end_time.clone()),
        updated_at: timestamp(),
        ..existing
    };
    validate_window(&state, &leave.start_date, &leave.start_time, &leave.end_date, &leave.end_time)?;

    // The activator may have picked the leave up since it was read
    let result = sqlx::query(
        r#"
        UPDATE monthly_leaves
        SET title = ?, description = ?, start_date = ?, start_time = ?, end_date = ?,
            end_time = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(&leave.title)
    .bind(&leave.description)
    .bind(&leave.start_date)
    .bind(&leave.start_time)
    .bind(&leave.end_date)
    .bind(&leave.end_time)
    .bind(&leave.updated_at)
    .bind(&id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Monthly leave has already started"));
    }

    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_UPDATE,
        resource_types::LEAVE,
        Some(&id),
        Some(serde_json::json!({ "title": leave.title })),
    )
    .await;

    Ok(Json(leave_detail(&state, leave).await?))
}

/// Delete a leave. Passes granted by a completed leave are kept but detached.
pub async fn delete_leave(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let leave = find_leave(&state, &id).await?;
    if leave.status == LeaveStatus::InProgress {
        return Err(ApiError::conflict(
            "Cannot delete a monthly leave that is in progress",
        ));
    }

    let mut tx = state.db.begin().await?;
    let detached = sqlx::query("UPDATE pass_grants SET leave_id = NULL WHERE leave_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM leave_exclusions WHERE leave_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM monthly_leaves WHERE id = ? AND status != 'in_progress'")
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::conflict("Monthly leave has already started"));
    }
    tx.commit().await?;

    tracing::info!(leave = %id, detached, "Monthly leave deleted");
    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_DELETE,
        resource_types::LEAVE,
        Some(&id),
        Some(serde_json::json!({ "title": leave.title, "status": leave.status })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Leave students out of a pending leave's bulk grant
pub async fn add_exclusions(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AddExclusionsRequest>,
) -> Result<Json<MonthlyLeaveDetail>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("student_ids", validate_student_ids(&req.student_ids));
    errors.check("reason", validate_description(&req.reason));
    errors.finish()?;

    let leave = find_leave(&state, &id).await?;
    require_pending(&leave, "change exclusions of")?;

    let reason = clean_optional(req.reason);
    let now = timestamp();
    let mut tx = state.db.begin().await?;
    claim_pending_leave(&mut tx, &id, &now).await?;
    let student_ids = resolve_students(&mut tx, &req.student_ids).await?;
    let added = insert_exclusions(&mut tx, &id, &student_ids, reason.as_deref(), &now).await?;
    tx.commit().await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_EXCLUDE,
        resource_types::LEAVE,
        Some(&id),
        Some(serde_json::json!({ "student_ids": student_ids, "added": added })),
    )
    .await;

    Ok(Json(leave_detail(&state, leave).await?))
}

/// Put an excluded student back into a pending leave
pub async fn remove_exclusion(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let leave = find_leave(&state, &id).await?;
    require_pending(&leave, "change exclusions of")?;

    let mut tx = state.db.begin().await?;
    claim_pending_leave(&mut tx, &id, &timestamp()).await?;
    let result = sqlx::query("DELETE FROM leave_exclusions WHERE leave_id = ? AND student_id = ?")
        .bind(&id)
        .bind(&student_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Student is not excluded from this leave"));
    }
    tx.commit().await?;

    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_INCLUDE,
        resource_types::LEAVE,
        Some(&id),
        Some(serde_json::json!({ "student_id": student_id })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Run one activator cycle now
pub async fn run_activator(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
) -> Result<Json<ActivatorRun>, ApiError> {
    require_admin(&user)?;

    let activator = LeaveActivator::new(state.db.clone(), state.config.leave.offset());
    let run = activator.run_cycle(Utc::now()).await?;
    *state.last_leave_run.write() = Some(run.clone());

    record_activity(
        &state,
        &user,
        &headers,
        actions::LEAVE_RUN,
        resource_types::LEAVE,
        None,
        serde_json::to_value(&run).ok(),
    )
    .await;

    Ok(Json(run))
}

/// Activator settings and the last cycle's summary
pub async fn activator_status(State(state): State<Arc<AppState>>) -> Json<ActivatorStatus> {
    let leave = &state.config.leave;
    Json(ActivatorStatus {
        enabled: leave.enabled,
        poll_interval_seconds: leave.poll_interval_seconds,
        utc_offset_minutes: leave.utc_offset_minutes,
        last_run: state.last_leave_run.read().clone(),
    })
}
