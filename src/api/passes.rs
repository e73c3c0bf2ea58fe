//! Phone and gate pass endpoints.
//!
//! Every transition runs in one transaction: the grant row is updated with a
//! compare-and-set on its previous status, and phone passes move the
//! `phone_status`/`phone_history` mirror alongside it.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, record_phone_movement, resource_types, CloseReason, IssuePassRequest, PassAction,
    PassActionRequest, PassGrant, PassKind, PassQuery, PassStatus, PhoneState, User,
};
use crate::utils::{normalize_instant, timestamp};
use crate::AppState;

use super::activity::record_activity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{clean_optional, validate_purpose, validate_uuid};

const DEFAULT_LIST_LIMIT: i64 = 200;
const MAX_LIST_LIMIT: i64 = 1000;

/// List passes, newest first
pub async fn list_passes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PassQuery>,
) -> Result<Json<Vec<PassGrant>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let passes = sqlx::query_as::<_, PassGrant>(
        r#"
        SELECT * FROM pass_grants
        WHERE (?1 IS NULL OR kind = ?1)
          AND (?2 IS NULL OR status = ?2)
          AND (?3 IS NULL OR student_id = ?3)
          AND (?4 IS NULL
               OR (?4 = 1 AND status != 'completed')
               OR (?4 = 0 AND status = 'completed'))
        ORDER BY issued_at DESC, id
        LIMIT ?5
        "#,
    )
    .bind(query.kind)
    .bind(query.status)
    .bind(&query.student_id)
    .bind(query.open)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(passes))
}

/// Get a single pass
pub async fn get_pass(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PassGrant>, ApiError> {
    if let Err(e) = validate_uuid(&id, "pass_id") {
        return Err(ApiError::validation_field("pass_id", e));
    }

    let pass = sqlx::query_as::<_, PassGrant>("SELECT * FROM pass_grants WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Pass not found"))?;

    Ok(Json(pass))
}

/// Issue a pass. A future `scheduled_for` makes it start out pending.
pub async fn issue_pass(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<IssuePassRequest>,
) -> Result<(StatusCode, Json<PassGrant>), ApiError> {
    let scheduled_for = clean_optional(req.scheduled_for);
    let expected_return_at = clean_optional(req.expected_return_at);

    let mut errors = ValidationErrorBuilder::new();
    if req.student_id.trim().is_empty() {
        errors.add("student_id", "Student is required");
    }
    errors.check("purpose", validate_purpose(&req.purpose));
    let scheduled_for = match scheduled_for {
        Some(ref value) => match normalize_instant(value) {
            Some(instant) => Some(instant),
            None => {
                errors.add("scheduled_for", "Invalid timestamp, expected RFC 3339");
                None
            }
        },
        None => None,
    };
    let expected_return_at = match expected_return_at {
        Some(ref value) => match normalize_instant(value) {
            Some(instant) => Some(instant),
            None => {
                errors.add("expected_return_at", "Invalid timestamp, expected RFC 3339");
                None
            }
        },
        None => None,
    };
    errors.finish()?;

    let student_id = req.student_id.trim();
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM students WHERE id = ?")
        .bind(student_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("Student not found"));
    }

    let open: Option<String> = sqlx::query_scalar(
        "SELECT id FROM pass_grants WHERE student_id = ? AND kind = ? AND status != 'completed'",
    )
    .bind(student_id)
    .bind(req.kind)
    .fetch_optional(&state.db)
    .await?;
    if open.is_some() {
        return Err(ApiError::conflict(format!(
            "Student already holds an open {} pass",
            req.kind
        )));
    }

    let now = timestamp();
    let status = match scheduled_for {
        Some(ref at) if at.as_str() > now.as_str() => PassStatus::Pending,
        _ => PassStatus::Active,
    };

    let pass = PassGrant {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        kind: req.kind,
        purpose: req.purpose.trim().to_string(),
        status,
        issued_by: Some(user.id.clone()),
        leave_id: None,
        scheduled_for,
        expected_return_at,
        issued_at: now.clone(),
        out_at: None,
        returned_at: None,
        closed_by: None,
        close_reason: None,
        created_at: now.clone(),
        updated_at: now,
    };

    // The partial unique index turns a concurrent duplicate into a 409 here
    sqlx::query(
        r#"
        INSERT INTO pass_grants (id, student_id, kind, purpose, status, issued_by, leave_id,
                                 scheduled_for, expected_return_at, issued_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&pass.id)
    .bind(&pass.student_id)
    .bind(pass.kind)
    .bind(&pass.purpose)
    .bind(pass.status)
    .bind(&pass.issued_by)
    .bind(&pass.scheduled_for)
    .bind(&pass.expected_return_at)
    .bind(&pass.issued_at)
    .bind(&pass.created_at)
    .bind(&pass.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(
        pass_id = %pass.id,
        student_id = %pass.student_id,
        kind = %pass.kind,
        status = %pass.status,
        "Pass issued"
    );
    record_activity(
        &state,
        &user,
        &headers,
        actions::PASS_ISSUE,
        resource_types::PASS,
        Some(&pass.id),
        Some(serde_json::json!({
            "student_id": pass.student_id,
            "kind": pass.kind,
            "status": pass.status,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(pass)))
}

/// Drive one pass transition and its phone mirror in a single transaction
async fn transition_pass(
    state: &AppState,
    user: &User,
    id: &str,
    action: PassAction,
    notes: Option<String>,
) -> Result<PassGrant, ApiError> {
    if let Err(e) = validate_uuid(id, "pass_id") {
        return Err(ApiError::validation_field("pass_id", e));
    }

    let mut tx = state.db.begin().await?;

    let pass = sqlx::query_as::<_, PassGrant>("SELECT * FROM pass_grants WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Pass not found"))?;

    let next = pass.status.apply(action)?;
    let now = timestamp();
    let close_reason = CloseReason::for_action(action);

    let out_at = match action {
        PassAction::CheckOut => Some(now.clone()),
        _ => pass.out_at.clone(),
    };
    let returned_at = match action {
        PassAction::Return => Some(now.clone()),
        _ => pass.returned_at.clone(),
    };
    let closed_by = match close_reason {
        Some(_) => Some(user.id.clone()),
        None => pass.closed_by.clone(),
    };

    let result = sqlx::query(
        r#"
        UPDATE pass_grants
        SET status = ?, out_at = ?, returned_at = ?, closed_by = ?, close_reason = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(next)
    .bind(&out_at)
    .bind(&returned_at)
    .bind(&closed_by)
    .bind(close_reason.or(pass.close_reason))
    .bind(&now)
    .bind(id)
    .bind(pass.status)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Pass was modified concurrently, reload and retry"));
    }

    if pass.kind == PassKind::Phone {
        let movement = match action {
            PassAction::CheckOut => Some(PhoneState::Out),
            PassAction::Return => Some(PhoneState::In),
            _ => None,
        };
        if let Some(movement) = movement {
            record_phone_movement(
                &mut tx,
                &pass.student_id,
                movement,
                Some(id),
                Some(&user.id),
                notes.as_deref(),
                &now,
            )
            .await?;
        }
    }

    tx.commit().await?;

    tracing::info!(
        pass_id = %id,
        kind = %pass.kind,
        from = %pass.status,
        to = %next,
        "Pass transitioned"
    );

    Ok(PassGrant {
        status: next,
        out_at,
        returned_at,
        closed_by,
        close_reason: close_reason.or(pass.close_reason),
        updated_at: now,
        ..pass
    })
}

async fn pass_action(
    state: Arc<AppState>,
    user: User,
    headers: HeaderMap,
    id: String,
    action: PassAction,
    activity: &str,
    body: Option<Json<PassActionRequest>>,
) -> Result<Json<PassGrant>, ApiError> {
    let notes = body.and_then(|Json(b)| clean_optional(b.notes));
    let pass = transition_pass(&state, &user, &id, action, notes.clone()).await?;

    record_activity(
        &state,
        &user,
        &headers,
        activity,
        resource_types::PASS,
        Some(&pass.id),
        Some(serde_json::json!({
            "student_id": pass.student_id,
            "kind": pass.kind,
            "notes": notes,
        })),
    )
    .await;

    Ok(Json(pass))
}

/// Hand over the phone, or let the student out of the gate
pub async fn check_out_pass(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<PassActionRequest>>,
) -> Result<Json<PassGrant>, ApiError> {
    pass_action(state, user, headers, id, PassAction::CheckOut, actions::PASS_OUT, body).await
}

/// Phone back in custody, or student back on campus
pub async fn return_pass(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<PassActionRequest>>,
) -> Result<Json<PassGrant>, ApiError> {
    pass_action(state, user, headers, id, PassAction::Return, actions::PASS_RETURN, body).await
}

/// Withdraw a pass that was never used
pub async fn cancel_pass(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<PassActionRequest>>,
) -> Result<Json<PassGrant>, ApiError> {
    pass_action(state, user, headers, id, PassAction::Cancel, actions::PASS_CANCEL, body).await
}
