//! Phone and gate pass models and the pass lifecycle.
//!
//! A pass moves `pending -> active -> out -> completed`. `pending` passes are
//! scheduled for a later instant; `completed` is terminal. Phone passes are
//! mirrored into `phone_status`/`phone_history` by the handlers that drive
//! these transitions.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PassKind {
    /// Custody of the student's own phone
    Phone,
    /// Leaving campus through the gate
    Gate,
}

impl PassKind {
    pub const ALL: [PassKind; 2] = [PassKind::Phone, PassKind::Gate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Gate => "gate",
        }
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PassStatus {
    Pending,
    Active,
    Out,
    Completed,
}

impl PassStatus {
    pub const ALL: [PassStatus; 4] = [Self::Pending, Self::Active, Self::Out, Self::Completed];

    /// Statuses `action` may be applied to
    pub fn accepting(action: PassAction) -> Vec<PassStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.apply(action).is_ok())
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Out => "out",
            Self::Completed => "completed",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// Apply an action, returning the resulting status
    pub fn apply(self, action: PassAction) -> Result<PassStatus, TransitionError> {
        match (self, action) {
            (Self::Pending, PassAction::Activate) => Ok(Self::Active),
            (Self::Active, PassAction::CheckOut) => Ok(Self::Out),
            (Self::Out, PassAction::Return) => Ok(Self::Completed),
            (Self::Pending | Self::Active, PassAction::Cancel) => Ok(Self::Completed),
            (Self::Pending | Self::Active, PassAction::EndLeave) => Ok(Self::Completed),
            (from, action) => Err(TransitionError { from, action }),
        }
    }
}

impl std::fmt::Display for PassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that can happen to a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAction {
    /// Scheduled start reached
    Activate,
    /// Phone handed over, or student walked out of the gate
    CheckOut,
    /// Phone back in custody, or student back on campus
    Return,
    /// Staff withdrew a pass that was never used
    Cancel,
    /// The monthly leave that granted the pass is over
    EndLeave,
}

impl std::fmt::Display for PassAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Activate => "activate",
            Self::CheckOut => "check out",
            Self::Return => "return",
            Self::Cancel => "cancel",
            Self::EndLeave => "end leave for",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a pass that is {from}")]
pub struct TransitionError {
    pub from: PassStatus,
    pub action: PassAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CloseReason {
    Returned,
    Cancelled,
    LeaveEnded,
}

impl CloseReason {
    pub fn for_action(action: PassAction) -> Option<CloseReason> {
        match action {
            PassAction::Return => Some(Self::Returned),
            PassAction::Cancel => Some(Self::Cancelled),
            PassAction::EndLeave => Some(Self::LeaveEnded),
            PassAction::Activate | PassAction::CheckOut => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PassGrant {
    pub id: String,
    pub student_id: String,
    pub kind: PassKind,
    pub purpose: String,
    pub status: PassStatus,
    pub issued_by: Option<String>,
    /// Monthly leave that granted this pass, if any
    pub leave_id: Option<String>,
    pub scheduled_for: Option<String>,
    pub expected_return_at: Option<String>,
    pub issued_at: String,
    pub out_at: Option<String>,
    pub returned_at: Option<String>,
    pub closed_by: Option<String>,
    pub close_reason: Option<CloseReason>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePassRequest {
    pub student_id: String,
    pub kind: PassKind,
    pub purpose: String,
    /// RFC 3339; when in the future the pass starts out pending
    #[serde(default)]
    pub scheduled_for: Option<String>,
    #[serde(default)]
    pub expected_return_at: Option<String>,
}

/// Optional body for out/return/cancel
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassActionRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassQuery {
    pub kind: Option<PassKind>,
    pub status: Option<PassStatus>,
    pub student_id: Option<String>,
    /// Only passes that are not completed
    #[serde(default)]
    pub open: Option<bool>,
    pub limit: Option<i64>,
}
