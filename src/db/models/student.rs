//! Student models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{PassGrant, PhoneStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Student {
    pub id: String,
    pub admission_number: String,
    pub name: String,
    pub locker_number: Option<String>,
    pub class_name: Option<String>,
    pub roll_number: Option<String>,
    /// Device name of the phone held in custody
    pub phone_name: Option<String>,
    pub special_pass: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudentRequest {
    pub admission_number: String,
    pub name: String,
    #[serde(default)]
    pub locker_number: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub roll_number: Option<String>,
    #[serde(default)]
    pub phone_name: Option<String>,
    #[serde(default)]
    pub special_pass: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStudentRequest {
    pub admission_number: Option<String>,
    pub name: Option<String>,
    pub locker_number: Option<String>,
    pub class_name: Option<String>,
    pub roll_number: Option<String>,
    pub phone_name: Option<String>,
    pub special_pass: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkStudentsRequest {
    pub students: Vec<CreateStudentRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkStudentsResponse {
    pub created: usize,
    /// Admission numbers that already existed (or repeated within the batch)
    pub skipped: Vec<String>,
}

/// Query parameters for listing students
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentQuery {
    pub class_name: Option<String>,
    /// Case-insensitive match on name or admission number
    pub q: Option<String>,
}

impl StudentQuery {
    /// Key under which this listing is cached
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}",
            self.class_name.as_deref().unwrap_or(""),
            self.q.as_deref().unwrap_or("").to_lowercase()
        )
    }
}

/// A student with everything the detail page shows
#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: Student,
    pub phone_status: Option<PhoneStatus>,
    pub open_passes: Vec<PassGrant>,
    pub tally_units: i64,
    pub tally_rupees: i64,
    pub unpaid_fines: i64,
}
