//! Monthly leave windows and their exclusions.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LeaveStatus {
    /// Waiting for the start time
    Pending,
    /// Passes granted, waiting for the end time
    InProgress,
    Completed,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonthlyLeave {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// `YYYY-MM-DD`, local wall clock
    pub start_date: String,
    /// `HH:MM`, local wall clock
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub status: LeaveStatus,
    pub passes_granted: i64,
    pub created_by: Option<String>,
    pub activated_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MonthlyLeave {
    /// Start of the window as a UTC instant
    pub fn starts_at(&self, offset: &FixedOffset) -> Option<DateTime<Utc>> {
        local_instant(&self.start_date, &self.start_time, offset)
    }

    /// End of the window as a UTC instant
    pub fn ends_at(&self, offset: &FixedOffset) -> Option<DateTime<Utc>> {
        local_instant(&self.end_date, &self.end_time, offset)
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Combine a local date and time in `offset` into a UTC instant
pub fn local_instant(date: &str, time: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::new(parse_date(date)?, parse_time(time)?);
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaveExclusion {
    pub id: String,
    pub leave_id: String,
    pub student_id: String,
    pub reason: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyLeaveDetail {
    #[serde(flatten)]
    pub leave: MonthlyLeave,
    pub exclusions: Vec<LeaveExclusion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLeaveRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    /// Students to leave out of the bulk grant
    #[serde(default)]
    pub excluded_student_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLeaveRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddExclusionsRequest {
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
