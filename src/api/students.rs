//! Student roster endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    actions, resource_types, tally_rupees, BulkStudentsRequest, BulkStudentsResponse,
    CreateStudentRequest, PassGrant, PhoneStatus, Student, StudentDetail, StudentQuery,
    UpdateStudentRequest, User,
};
use crate::utils::timestamp;
use crate::AppState;

use super::activity::record_activity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    clean_optional, validate_admission_number, validate_short_field, validate_student_name,
    validate_uuid, MAX_BULK_STUDENTS,
};

fn check_create_request(
    errors: &mut ValidationErrorBuilder,
    req: &CreateStudentRequest,
    prefix: &str,
) {
    errors.check(
        &format!("{}admission_number", prefix),
        validate_admission_number(&req.admission_number),
    );
    errors.check(&format!("{}name", prefix), validate_student_name(&req.name));
    errors.check(
        &format!("{}locker_number", prefix),
        validate_short_field(&req.locker_number, "Locker number"),
    );
    errors.check(
        &format!("{}class_name", prefix),
        validate_short_field(&req.class_name, "Class"),
    );
    errors.check(
        &format!("{}roll_number", prefix),
        validate_short_field(&req.roll_number, "Roll number"),
    );
    errors.check(
        &format!("{}phone_name", prefix),
        validate_short_field(&req.phone_name, "Phone name"),
    );
}

/// Insert a student and seed its phone status inside `tx`
async fn insert_student(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    req: CreateStudentRequest,
    now: &str,
) -> Result<Student, sqlx::Error> {
    let student = Student {
        id: Uuid::new_v4().to_string(),
        admission_number: req.admission_number.trim().to_string(),
        name: req.name.trim().to_string(),
        locker_number: clean_optional(req.locker_number),
        class_name: clean_optional(req.class_name),
        roll_number: clean_optional(req.roll_number),
        phone_name: clean_optional(req.phone_name),
        special_pass: req.special_pass,
        created_at: now.to_string(),
        updated_at: now.to_string(),
    };

    sqlx::query(
        r#"
        INSERT INTO students (id, admission_number, name, locker_number, class_name, roll_number,
                              phone_name, special_pass, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&student.id)
    .bind(&student.admission_number)
    .bind(&student.name)
    .bind(&student.locker_number)
    .bind(&student.class_name)
    .bind(&student.roll_number)
    .bind(&student.phone_name)
    .bind(student.special_pass)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO phone_status (student_id, status, updated_at) VALUES (?, 'in', ?)")
        .bind(&student.id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

    Ok(student)
}

/// List students, served through the roster cache
pub async fn list_students(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<Vec<Student>>, ApiError> {
    let key = query.cache_key();
    if let Some(cached) = state.student_cache.get(&key) {
        return Ok(Json(cached.as_ref().clone()));
    }
    let generation = state.student_cache.generation();

    let class_name = clean_optional(query.class_name.clone());
    let pattern = clean_optional(query.q.clone()).map(|q| format!("%{}%", q.to_lowercase()));

    let students = sqlx::query_as::<_, Student>(
        r#"
        SELECT * FROM students
        WHERE (?1 IS NULL OR class_name = ?1)
          AND (?2 IS NULL OR LOWER(name) LIKE ?2 OR LOWER(admission_number) LIKE ?2)
        ORDER BY class_name, CAST(roll_number AS INTEGER), roll_number, name
        "#,
    )
    .bind(&class_name)
    .bind(&pattern)
    .fetch_all(&state.db)
    .await?;

    let students = state.student_cache.put(key, generation, students);
    Ok(Json(students.as_ref().clone()))
}

/// Get a student with phone status, open passes and totals
pub async fn get_student(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StudentDetail>, ApiError> {
    if let Err(e) = validate_uuid(&id, "student_id") {
        return Err(ApiError::validation_field("student_id", e));
    }

    let student = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let phone_status =
        sqlx::query_as::<_, PhoneStatus>("SELECT * FROM phone_status WHERE student_id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;

    let open_passes = sqlx::query_as::<_, PassGrant>(
        "SELECT * FROM pass_grants WHERE student_id = ? AND status != 'completed' ORDER BY issued_at",
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    let tally_units: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(t.value), 0) FROM student_tallies st
        JOIN tally_types t ON t.id = st.tally_type_id
        WHERE st.student_id = ?
        "#,
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    let unpaid_fines: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM student_fines WHERE student_id = ? AND status = 'unpaid'",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(StudentDetail {
        student,
        phone_status,
        open_passes,
        tally_units,
        tally_rupees: tally_rupees(tally_units, state.config.tally.rupees_per_unit),
        unpaid_fines,
    }))
}

/// Create a student
pub async fn create_student(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    check_create_request(&mut errors, &req, "");
    errors.finish()?;

    let now = timestamp();
    let mut tx = state.db.begin().await?;
    let student = insert_student(&mut tx, req, &now).await?;
    tx.commit().await?;
    state.student_cache.invalidate();

    tracing::info!(
        student_id = %student.id,
        admission_number = %student.admission_number,
        "Student created"
    );
    record_activity(
        &state,
        &user,
        &headers,
        actions::STUDENT_CREATE,
        resource_types::STUDENT,
        Some(&student.id),
        Some(serde_json::json!({
            "admission_number": student.admission_number,
            "name": student.name,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(student)))
}

/// Import many students at once; existing admission numbers are skipped
pub async fn bulk_create_students(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Json(req): Json<BulkStudentsRequest>,
) -> Result<Json<BulkStudentsResponse>, ApiError> {
    if req.students.is_empty() {
        return Err(ApiError::validation_field("students", "No students supplied"));
    }
    if req.students.len() > MAX_BULK_STUDENTS {
        return Err(ApiError::validation_field(
            "students",
            format!("Too many students (max {})", MAX_BULK_STUDENTS),
        ));
    }

    let mut errors = ValidationErrorBuilder::new();
    for (i, student) in req.students.iter().enumerate() {
        check_create_request(&mut errors, student, &format!("students[{}].", i));
    }
    errors.finish()?;

    let now = timestamp();
    let mut seen = HashSet::new();
    let mut skipped = Vec::new();
    let mut created = 0;

    let mut tx = state.db.begin().await?;
    for student in req.students {
        let admission_number = student.admission_number.trim().to_string();
        if !seen.insert(admission_number.clone()) {
            skipped.push(admission_number);
            continue;
        }

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM students WHERE admission_number = ?")
                .bind(&admission_number)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_some() {
            skipped.push(admission_number);
            continue;
        }

        insert_student(&mut tx, student, &now).await?;
        created += 1;
    }
    tx.commit().await?;
    state.student_cache.invalidate();

    tracing::info!(created, skipped = skipped.len(), "Students imported");
    record_activity(
        &state,
        &user,
        &headers,
        actions::STUDENT_IMPORT,
        resource_types::STUDENT,
        None,
        Some(serde_json::json!({ "created": created, "skipped": skipped.len() })),
    )
    .await;

    Ok(Json(BulkStudentsResponse { created, skipped }))
}

/// Update a student; blank optional fields are cleared
pub async fn update_student(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateStudentRequest>,
) -> Result<Json<Student>, ApiError> {
    if let Err(e) = validate_uuid(&id, "student_id") {
        return Err(ApiError::validation_field("student_id", e));
    }

    let existing = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref admission_number) = req.admission_number {
        errors.check("admission_number", validate_admission_number(admission_number));
    }
    if let Some(ref name) = req.name {
        errors.check("name", validate_student_name(name));
    }
    errors.check("locker_number", validate_short_field(&req.locker_number, "Locker number"));
    errors.check("class_name", validate_short_field(&req.class_name, "Class"));
    errors.check("roll_number", validate_short_field(&req.roll_number, "Roll number"));
    errors.check("phone_name", validate_short_field(&req.phone_name, "Phone name"));
    errors.finish()?;

    let merge = |new: Option<String>, old: Option<String>| match new {
        Some(v) => clean_optional(Some(v)),
        None => old,
    };

    let student = Student {
        admission_number: req
            .admission_number
            .map(|v| v.trim().to_string())
            .unwrap_or(existing.admission_number),
        name: req.name.map(|v| v.trim().to_string()).unwrap_or(existing.name),
        locker_number: merge(req.locker_number, existing.locker_number),
        class_name: merge(req.class_name, existing.class_name),
        roll_number: merge(req.roll_number, existing.roll_number),
        phone_name: merge(req.phone_name, existing.phone_name),
        special_pass: req.special_pass.unwrap_or(existing.special_pass),
        updated_at: timestamp(),
        ..existing
    };

    sqlx::query(
        r#"
        UPDATE students SET
            admission_number = ?, name = ?, locker_number = ?, class_name = ?,
            roll_number = ?, phone_name = ?, special_pass = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&student.admission_number)
    .bind(&student.name)
    .bind(&student.locker_number)
    .bind(&student.class_name)
    .bind(&student.roll_number)
    .bind(&student.phone_name)
    .bind(student.special_pass)
    .bind(&student.updated_at)
    .bind(&id)
    .execute(&state.db)
    .await?;
    state.student_cache.invalidate();

    record_activity(
        &state,
        &user,
        &headers,
        actions::STUDENT_UPDATE,
        resource_types::STUDENT,
        Some(&id),
        Some(serde_json::json!({ "admission_number": student.admission_number })),
    )
    .await;

    Ok(Json(student))
}

/// Delete a student together with every row that references it
pub async fn delete_student(
    State(state): State<Arc<AppState>>,
    user: User,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = validate_uuid(&id, "student_id") {
        return Err(ApiError::validation_field("student_id", e));
    }

    let mut tx = state.db.begin().await?;

    let student = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    for table in [
        "phone_history",
        "phone_status",
        "pass_grants",
        "student_fines",
        "student_tallies",
        "leave_exclusions",
    ] {
        sqlx::query(&format!("DELETE FROM {} WHERE student_id = ?", table))
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    state.student_cache.invalidate();

    tracing::info!(student_id = %id, admission_number = %student.admission_number, "Student deleted");
    record_activity(
        &state,
        &user,
        &headers,
        actions::STUDENT_DELETE,
        resource_types::STUDENT,
        Some(&id),
        Some(serde_json::json!({
            "admission_number": student.admission_number,
            "name": student.name,
        })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Distinct ids from `ids` in their original order; 404 if any student is unknown
pub(super) async fn resolve_students(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ids: &[String],
) -> Result<Vec<String>, ApiError> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(ids.len());

    for id in ids.iter().map(|id| id.trim()) {
        if !seen.insert(id) {
            continue;
        }
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM students WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        if exists.is_none() {
            return Err(ApiError::not_found(format!("Student not found: {}", id)));
        }
        resolved.push(id.to_string());
    }

    Ok(resolved)
}
