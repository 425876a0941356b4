use crate::agg;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, now_ts, optional_str, parse_iso_date, require_staff, required_str,
    staff_can_view_classroom, staff_has_classroom, student_by_id, StaffCtx,
};
use crate::ipc::types::{AppState, Principal, Request, Role};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn parse_status(raw: &str) -> Result<&'static str, HandlerErr> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "p" | "present" => Ok("P"),
        "a" | "absent" => Ok("A"),
        other => Err(HandlerErr::validation(format!(
            "status must be P or A, got: {}",
            other
        ))),
    }
}

/// The defining invariant: one attendance row per (student, classroom,
/// date). The unique constraint plus ON CONFLICT upsert makes the
/// check-then-write atomic; a lost-update race cannot produce duplicates.
/// Updates overwrite status only, keeping the original marker and
/// created_at stamp.
fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    classroom_id: &str,
    date: NaiveDate,
    status: &str,
    marked_by: &str,
) -> Result<(), rusqlite::Error> {
    let ts = now_ts();
    conn.execute(
        "INSERT INTO attendance(
            id, student_id, classroom_id, date, status, marked_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, classroom_id, date) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            classroom_id,
            date.format("%Y-%m-%d").to_string(),
            status,
            marked_by,
            &ts,
            &ts,
        ),
    )?;
    Ok(())
}

fn check_scope(
    conn: &Connection,
    ctx: &StaffCtx,
    classroom_id: &str,
) -> Result<(), HandlerErr> {
    if !staff_has_classroom(conn, &ctx.profile_id, classroom_id)? {
        return Err(HandlerErr::access_denied("no access to this classroom"));
    }
    Ok(())
}

fn mark_one(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let student_id = required_str(params, "studentId")?;
    let classroom_id = required_str(params, "classroomId")?;
    let date = parse_iso_date(&required_str(params, "date")?)?;
    let status = parse_status(&required_str(params, "status")?)?;

    classroom_by_id(conn, &classroom_id)?;
    let student = student_by_id(conn, &student_id)?;
    if student.classroom_id != classroom_id {
        return Err(HandlerErr::validation("student is not in this classroom"));
    }
    check_scope(conn, &ctx, &classroom_id)?;

    upsert_attendance(conn, &student_id, &classroom_id, date, status, &ctx.profile_id)
        .map_err(|e| HandlerErr::db_write("record attendance", e))?;

    Ok(json!({ "recorded": true, "status": status }))
}

/// Batch entries are "studentId:STATUS" strings. A malformed entry fails
/// alone; the rest of the batch still commits.
fn mark_batch(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let classroom_id = required_str(params, "classroomId")?;
    let date = parse_iso_date(&required_str(params, "date")?)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    classroom_by_id(conn, &classroom_id)?;
    check_scope(conn, &ctx, &classroom_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db_write("record attendance", e))?;

    let mut applied = 0usize;
    let mut failed: Vec<serde_json::Value> = Vec::new();
    let mut fail = |entry: &str, e: HandlerErr| {
        failed.push(json!({
            "entry": entry,
            "code": e.code,
            "message": e.message
        }));
    };

    for raw in entries {
        let Some(entry) = raw.as_str() else {
            fail("", HandlerErr::validation("entry must be a string"));
            continue;
        };
        let Some((student_id, status_raw)) = entry.split_once(':') else {
            fail(entry, HandlerErr::validation("missing ':' separator"));
            continue;
        };
        let status = match parse_status(status_raw) {
            Ok(v) => v,
            Err(e) => {
                fail(entry, e);
                continue;
            }
        };
        let student = match student_by_id(&tx, student_id.trim()) {
            Ok(v) => v,
            Err(e) => {
                fail(entry, e);
                continue;
            }
        };
        if student.classroom_id != classroom_id {
            fail(entry, HandlerErr::validation("student is not in this classroom"));
            continue;
        }
        match upsert_attendance(&tx, &student.id, &classroom_id, date, status, &ctx.profile_id) {
            Ok(()) => applied += 1,
            Err(e) => fail(entry, HandlerErr::db_write("record attendance", e)),
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::db_write("record attendance", e))?;

    Ok(json!({ "applied": applied, "failed": failed }))
}

fn parse_range(
    params: &serde_json::Value,
) -> Result<Option<(NaiveDate, NaiveDate)>, HandlerErr> {
    match (
        optional_str(params, "startDate"),
        optional_str(params, "endDate"),
    ) {
        (None, None) => Ok(None),
        (Some(s), Some(e)) => Ok(Some((parse_iso_date(&s)?, parse_iso_date(&e)?))),
        _ => Err(HandlerErr::bad_params(
            "startDate and endDate must be given together",
        )),
    }
}

fn student_summary(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p = principal.ok_or_else(HandlerErr::not_authenticated)?;

    // Students read themselves; staff read students of classrooms in scope.
    let student = match p.role {
        Role::Student => {
            let own = p
                .profile_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("student profile missing"))?;
            if let Some(requested) = optional_str(params, "studentId") {
                if requested != own {
                    return Err(HandlerErr::access_denied("students may only view themselves"));
                }
            }
            student_by_id(conn, &own)?
        }
        Role::Staff | Role::Hod => {
            let ctx = require_staff(principal)?;
            let student = student_by_id(conn, &required_str(params, "studentId")?)?;
            let classroom = classroom_by_id(conn, &student.classroom_id)?;
            if !staff_can_view_classroom(conn, &ctx, &classroom)? {
                return Err(HandlerErr::access_denied("no access to this classroom"));
            }
            student
        }
        Role::Admin => {
            return Err(HandlerErr::access_denied("student or staff access required"))
        }
    };

    let classroom_id = optional_str(params, "classroomId")
        .unwrap_or_else(|| student.classroom_id.clone());
    let range = parse_range(params)?;

    let totals = agg::attendance_totals(conn, &student.id, &classroom_id, range)
        .map_err(|e| HandlerErr::new("db_query_failed", e.message))?;

    let mut stmt = conn
        .prepare(
            "SELECT date, status, updated_at FROM attendance
             WHERE student_id = ? AND classroom_id = ?
             ORDER BY date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&student.id, &classroom_id), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "updatedAt": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "studentId": student.id,
        "classroomId": classroom_id,
        "totalDays": totals.total_days,
        "presentDays": totals.present_days,
        "percentage": totals.percentage,
        "rows": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: &dyn Fn(&Connection, Option<&Principal>) -> Result<serde_json::Value, HandlerErr>| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, state.principal.as_ref()) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }
    };

    match req.method.as_str() {
        "attendance.mark" => Some(run(&|c, p| mark_one(c, p, &req.params))),
        "attendance.markBatch" => Some(run(&|c, p| mark_batch(c, p, &req.params))),
        "attendance.studentSummary" => Some(run(&|c, p| student_summary(c, p, &req.params))),
        _ => None,
    }
}
