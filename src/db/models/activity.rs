//! Staff activity log for tracking who changed what.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Activity log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: String,
}

/// Response for listing activity logs with pagination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogListResponse {
    pub items: Vec<ActivityLog>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Query parameters for filtering activity logs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActivityLogQuery {
    /// Filter by action (e.g., "pass.out")
    pub action: Option<String>,
    /// Filter by resource type (e.g., "student", "pass")
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 50, max 100)
    pub per_page: Option<i64>,
}

/// Who performed an action, as recorded in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct Actor<'a> {
    pub user_id: Option<&'a str>,
    pub username: Option<&'a str>,
    pub ip_address: Option<&'a str>,
}

/// Common activity action types
pub mod actions {
    pub const STUDENT_CREATE: &str = "student.create";
    pub const STUDENT_IMPORT: &str = "student.import";
    pub const STUDENT_UPDATE: &str = "student.update";
    pub const STUDENT_DELETE: &str = "student.delete";

    pub const USER_CREATE: &str = "user.create";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_DELETE: &str = "user.delete";

    pub const PASS_ISSUE: &str = "pass.issue";
    pub const PASS_OUT: &str = "pass.out";
    pub const PASS_RETURN: &str = "pass.return";
    pub const PASS_CANCEL: &str = "pass.cancel";

    pub const FINE_CREATE: &str = "fine.create";
    pub const FINE_UPDATE: &str = "fine.update";
    pub const FINE_DELETE: &str = "fine.delete";
    pub const FINE_ISSUE: &str = "fine.issue";
    pub const FINE_PAID: &str = "fine.paid";
    pub const FINE_UNPAID: &str = "fine.unpaid";
    pub const FINE_REVOKE: &str = "fine.revoke";

    pub const TALLY_TYPE_CREATE: &str = "tally_type.create";
    pub const TALLY_TYPE_UPDATE: &str = "tally_type.update";
    pub const TALLY_TYPE_DELETE: &str = "tally_type.delete";
    pub const TALLY_ISSUE: &str = "tally.issue";
    pub const TALLY_REVOKE: &str = "tally.revoke";

    pub const LEAVE_CREATE: &str = "leave.create";
    pub const LEAVE_UPDATE: &str = "leave.update";
    pub const LEAVE_DELETE: &str = "leave.delete";
    pub const LEAVE_EXCLUDE: &str = "leave.exclude";
    pub const LEAVE_INCLUDE: &str = "leave.include";
    pub const LEAVE_RUN: &str = "leave.run";

    pub const AUTH_LOGIN: &str = "auth.login";
    pub const AUTH_LOGOUT: &str = "auth.logout";
}

/// Common resource types
pub mod resource_types {
    pub const STUDENT: &str = "student";
    pub const USER: &str = "user";
    pub const PASS: &str = "pass";
    pub const FINE: &str = "fine";
    pub const STUDENT_FINE: &str = "student_fine";
    pub const TALLY_TYPE: &str = "tally_type";
    pub const TALLY: &str = "tally";
    pub const LEAVE: &str = "leave";
    pub const SESSION: &str = "session";
}

/// Write an activity entry to the database
pub async fn log_activity(
    db: &SqlitePool,
    actor: Actor<'_>,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    details: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::utils::timestamp();
    let details_json = details.map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO user_activity_logs (id, user_id, username, action, resource_type, resource_id, details, ip_address, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(actor.user_id)
    .bind(actor.username)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(&details_json)
    .bind(actor.ip_address)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        action = action,
        resource_type = resource_type,
        resource_id = resource_id,
        user_id = actor.user_id,
        "Activity recorded"
    );

    Ok(())
}

/// List activity logs with filtering and pagination
pub async fn list_activity_logs(
    db: &SqlitePool,
    query: &ActivityLogQuery,
) -> Result<ActivityLogListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 100);
    let offset = (page - 1).saturating_mul(per_page);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(action) = &query.action {
        conditions.push("action = ?");
        bindings.push(action.clone());
    }
    if let Some(resource_type) = &query.resource_type {
        conditions.push("resource_type = ?");
        bindings.push(resource_type.clone());
    }
    if let Some(resource_id) = &query.resource_id {
        conditions.push("resource_id = ?");
        bindings.push(resource_id.clone());
    }
    if let Some(user_id) = &query.user_id {
        conditions.push("user_id = ?");
        bindings.push(user_id.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM user_activity_logs {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM user_activity_logs {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut query_builder = sqlx::query_as::<_, ActivityLog>(&sql);
    for binding in &bindings {
        query_builder = query_builder.bind(binding);
    }
    query_builder = query_builder.bind(per_page).bind(offset);

    let items = query_builder.fetch_all(db).await?;

    let total_pages = (total + per_page - 1) / per_page;

    Ok(ActivityLogListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    })
}
