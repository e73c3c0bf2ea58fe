//! Input validation for API requests.
//!
//! Each validator returns `Err(message)`; handlers collect them with
//! `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{parse_date, parse_time};

lazy_static! {
    /// Admission numbers as printed on school records (e.g. "2024/118", "ADM-0042")
    static ref ADMISSION_NUMBER_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9/_.-]*$"
    ).unwrap();

    /// Staff usernames
    static ref USERNAME_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9_.-]+$"
    ).unwrap();

    /// UI permission names (e.g. "phone_pass", "monthly_leave")
    static ref PERMISSION_REGEX: Regex = Regex::new(
        r"^[a-z][a-z0-9_]*$"
    ).unwrap();
}

/// Largest number of students a single bulk issue may target
pub const MAX_BULK_STUDENTS: usize = 2000;

pub fn validate_admission_number(value: &str) -> Result<(), String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("Admission number is required".to_string());
    }
    if value.len() > 32 {
        return Err("Admission number is too long (max 32 characters)".to_string());
    }
    if !ADMISSION_NUMBER_REGEX.is_match(value) {
        return Err("Admission number may only contain letters, digits, '/', '_', '.' and '-'".to_string());
    }
    Ok(())
}

pub fn validate_student_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

/// Short optional text fields such as locker, class and roll number
pub fn validate_short_field(value: &Option<String>, label: &str) -> Result<(), String> {
    if let Some(v) = value {
        if v.chars().count() > 50 {
            return Err(format!("{} is too long (max 50 characters)", label));
        }
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.len() < 3 {
        return Err("Username is too short (min 3 characters)".to_string());
    }
    if username.len() > 32 {
        return Err("Username is too long (max 32 characters)".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err("Username may only contain letters, digits, '_', '.' and '-'".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 6 {
        return Err("Password must be at least 6 characters".to_string());
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

pub fn validate_permissions(permissions: &[String]) -> Result<(), String> {
    if permissions.len() > 50 {
        return Err("Too many permissions (max 50)".to_string());
    }
    for permission in permissions {
        if permission.len() > 64 || !PERMISSION_REGEX.is_match(permission) {
            return Err(format!("Invalid permission name: {}", permission));
        }
    }
    Ok(())
}

pub fn validate_purpose(purpose: &str) -> Result<(), String> {
    let purpose = purpose.trim();
    if purpose.is_empty() {
        return Err("Purpose is required".to_string());
    }
    if purpose.chars().count() > 500 {
        return Err("Purpose is too long (max 500 characters)".to_string());
    }
    Ok(())
}

/// Names of fines, tally types and leaves
pub fn validate_catalog_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

pub fn validate_description(description: &Option<String>) -> Result<(), String> {
    if let Some(d) = description {
        if d.chars().count() > 1000 {
            return Err("Description is too long (max 1000 characters)".to_string());
        }
    }
    Ok(())
}

/// Fine amount in rupees
pub fn validate_amount(amount: i64) -> Result<(), String> {
    if amount < 0 {
        return Err("Amount cannot be negative".to_string());
    }
    if amount > 1_000_000 {
        return Err("Amount is too large (max 1000000)".to_string());
    }
    Ok(())
}

/// Tally units per issue
pub fn validate_tally_value(value: i64) -> Result<(), String> {
    if !(1..=1000).contains(&value) {
        return Err("Tally value must be between 1 and 1000".to_string());
    }
    Ok(())
}

pub fn validate_student_ids(ids: &[String]) -> Result<(), String> {
    if ids.is_empty() {
        return Err("Select at least one student".to_string());
    }
    if ids.len() > MAX_BULK_STUDENTS {
        return Err(format!("Too many students (max {})", MAX_BULK_STUDENTS));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err("Student ids cannot be empty".to_string());
    }
    Ok(())
}

pub fn validate_date(value: &str) -> Result<(), String> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

pub fn validate_time(value: &str) -> Result<(), String> {
    parse_time(value)
        .map(|_| ())
        .ok_or_else(|| format!("Invalid time '{}', expected HH:MM", value))
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Trim an optional text field, mapping blank to None
pub fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
