use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::HandlerErr;
use super::types::{Principal, Role};

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn parse_iso_date(s: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::invalid_date(format!("not a valid date: {}", s.trim())))
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

pub struct StaffCtx {
    pub profile_id: String,
    pub department_id: String,
    pub is_hod: bool,
}

pub fn require_staff(principal: Option<&Principal>) -> Result<StaffCtx, HandlerErr> {
    let p = principal.ok_or_else(HandlerErr::not_authenticated)?;
    match p.role {
        Role::Staff | Role::Hod => Ok(StaffCtx {
            profile_id: p
                .profile_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("staff profile missing"))?,
            department_id: p
                .department_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("staff department missing"))?,
            is_hod: p.role == Role::Hod,
        }),
        _ => Err(HandlerErr::access_denied("staff access required")),
    }
}

pub fn require_hod(principal: Option<&Principal>) -> Result<StaffCtx, HandlerErr> {
    let ctx = require_staff(principal)?;
    if !ctx.is_hod {
        return Err(HandlerErr::access_denied("head of department access required"));
    }
    Ok(ctx)
}

pub fn staff_has_classroom(
    conn: &Connection,
    staff_profile_id: &str,
    classroom_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM staff_classes WHERE staff_profile_id = ? AND classroom_id = ?",
        (staff_profile_id, classroom_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

#[derive(Debug, Clone)]
pub struct ClassroomRow {
    pub id: String,
    pub department_id: String,
    pub name: String,
}

pub fn classroom_by_id(conn: &Connection, id: &str) -> Result<ClassroomRow, HandlerErr> {
    conn.query_row(
        "SELECT id, department_id, name FROM classrooms WHERE id = ?",
        [id],
        |r| {
            Ok(ClassroomRow {
                id: r.get(0)?,
                department_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("classroom not found"))
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub classroom_id: String,
    pub department_id: String,
    pub is_approved: bool,
}

pub fn student_by_id(conn: &Connection, id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        "SELECT id, classroom_id, department_id, is_approved
         FROM student_profiles WHERE id = ?",
        [id],
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                classroom_id: r.get(1)?,
                department_id: r.get(2)?,
                is_approved: r.get::<_, i64>(3)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

/// Read scope over a classroom: an assignment grants it to any staff;
/// HODs additionally read every classroom of their own department.
pub fn staff_can_view_classroom(
    conn: &Connection,
    ctx: &StaffCtx,
    classroom: &ClassroomRow,
) -> Result<bool, HandlerErr> {
    if ctx.is_hod && classroom.department_id == ctx.department_id {
        return Ok(true);
    }
    staff_has_classroom(conn, &ctx.profile_id, &classroom.id)
}
