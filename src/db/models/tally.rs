//! Tally types and demerits issued to students.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TallyType {
    pub id: String,
    pub name: String,
    /// Demerit units per issue
    pub value: i64,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentTally {
    pub id: String,
    pub student_id: String,
    pub tally_type_id: String,
    pub remarks: Option<String>,
    pub issued_by: Option<String>,
    pub issued_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentTallyDetail {
    pub id: String,
    pub student_id: String,
    pub admission_number: String,
    pub student_name: String,
    pub tally_type_id: String,
    pub tally_name: String,
    pub value: i64,
    pub remarks: Option<String>,
    pub issued_by: Option<String>,
    pub issued_at: String,
}

/// Per-student totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallySummary {
    pub student_id: String,
    pub admission_number: String,
    pub name: String,
    pub count: i64,
    pub units: i64,
    pub rupees: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTallyTypeRequest {
    pub name: String,
    pub value: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTallyTypeRequest {
    pub name: Option<String>,
    pub value: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentTallyQuery {
    pub student_id: Option<String>,
}

/// Bulk issue body shared by fines and tallies
#[derive(Debug, Clone, Deserialize)]
pub struct IssueToStudentsRequest {
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueToStudentsResponse {
    pub issued: usize,
    pub ids: Vec<String>,
}

/// Convert demerit units into rupees
pub fn tally_rupees(units: i64, rupees_per_unit: i64) -> i64 {
    units.saturating_mul(rupees_per_unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_rupees() {
        assert_eq!(tally_rupees(0, 10), 0);
        assert_eq!(tally_rupees(7, 10), 70);
        assert_eq!(tally_rupees(i64::MAX, 10), i64::MAX);
    }
}
