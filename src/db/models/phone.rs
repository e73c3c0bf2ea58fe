//! Phone custody mirror: current status per student plus an append-only log.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PhoneState {
    /// Phone is held by the hostel
    In,
    /// Phone is with the student
    Out,
}

impl PhoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PhoneStatus {
    pub student_id: String,
    pub status: PhoneState,
    pub pass_id: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhoneStatusWithStudent {
    pub student_id: String,
    pub admission_number: String,
    pub name: String,
    pub class_name: Option<String>,
    pub phone_name: Option<String>,
    pub status: PhoneState,
    pub pass_id: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhoneHistory {
    pub id: String,
    pub student_id: String,
    pub pass_id: Option<String>,
    pub action: PhoneState,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneStatusQuery {
    pub status: Option<PhoneState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneHistoryQuery {
    pub student_id: Option<String>,
    /// Defaults to 100, max 500
    pub limit: Option<i64>,
}

/// Set a student's phone status and append the matching history entry.
///
/// Runs inside the caller's transaction so the mirror never disagrees with
/// the pass row that caused it.
pub async fn record_phone_movement(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    state: PhoneState,
    pass_id: Option<&str>,
    performed_by: Option<&str>,
    notes: Option<&str>,
    now: &str,
) -> Result<(), sqlx::Error> {
    let current_pass = match state {
        PhoneState::Out => pass_id,
        PhoneState::In => None,
    };

    sqlx::query(
        r#"
        INSERT INTO phone_status (student_id, status, pass_id, updated_by, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(student_id) DO UPDATE SET
            status = excluded.status,
            pass_id = excluded.pass_id,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(student_id)
    .bind(state)
    .bind(current_pass)
    .bind(performed_by)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO phone_history (id, student_id, pass_id, action, performed_by, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(student_id)
    .bind(pass_id)
    .bind(state)
    .bind(performed_by)
    .bind(notes)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(student_id, status = state.as_str(), "Phone status updated");

    Ok(())
}
