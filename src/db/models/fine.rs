//! Fine catalog and fines issued to students.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fine {
    pub id: String,
    pub name: String,
    /// Rupees
    pub amount: i64,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FineStatus {
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentFine {
    pub id: String,
    pub student_id: String,
    pub fine_id: String,
    /// Amount at the time of issue; catalog edits don't rewrite history
    pub amount: i64,
    pub remarks: Option<String>,
    pub issued_by: Option<String>,
    pub status: FineStatus,
    pub issued_at: String,
    pub paid_at: Option<String>,
}

/// Issued fine joined with its catalog and student names
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentFineDetail {
    pub id: String,
    pub student_id: String,
    pub admission_number: String,
    pub student_name: String,
    pub fine_id: String,
    pub fine_name: String,
    pub amount: i64,
    pub remarks: Option<String>,
    pub issued_by: Option<String>,
    pub status: FineStatus,
    pub issued_at: String,
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFineRequest {
    pub name: String,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFineRequest {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStudentFineRequest {
    pub paid: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentFineQuery {
    pub student_id: Option<String>,
    pub status: Option<FineStatus>,
}
