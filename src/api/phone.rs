use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::db::{PhoneHistory, PhoneHistoryQuery, PhoneStatusQuery, PhoneStatusWithStudent};
use crate::AppState;

use super::error::ApiError;

/// Current phone custody for every student
pub async fn list_phone_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PhoneStatusQuery>,
) -> Result<Json<Vec<PhoneStatusWithStudent>>, ApiError> {
    let rows = sqlx::query_as::<_, PhoneStatusWithStudent>(
        r#"
        SELECT ps.student_id, s.admission_number, s.name, s.class_name, s.phone_name,
               ps.status, ps.pass_id, ps.updated_by, ps.updated_at
        FROM phone_status ps
        JOIN students s ON s.id = ps.student_id
        WHERE (?1 IS NULL OR ps.status = ?1)
        ORDER BY s.class_name, CAST(s.roll_number AS INTEGER), s.roll_number, s.name
        "#,
    )
    .bind(query.status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

/// Phone movements, newest first
pub async fn list_phone_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PhoneHistoryQuery>,
) -> Result<Json<Vec<PhoneHistory>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let rows = sqlx::query_as::<_, PhoneHistory>(
        r#"
        SELECT * FROM phone_history
        WHERE (?1 IS NULL OR student_id = ?1)
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?2
        "#,
    )
    .bind(&query.student_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}
