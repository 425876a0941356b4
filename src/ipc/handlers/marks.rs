use crate::agg;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, now_ts, optional_str, require_staff, required_f64, required_str,
    staff_can_view_classroom, staff_has_classroom, student_by_id,
};
use crate::ipc::types::{AppState, Principal, Request, Role};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Upsert keyed by (student, classroom, subject, exam_type). Re-entering
/// overwrites the values and attributes the row to the latest actor;
/// entered_at keeps the original entry time.
fn enter(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let student_id = required_str(params, "studentId")?;
    let classroom_id = required_str(params, "classroomId")?;
    let subject = required_str(params, "subject")?;
    let exam_type = required_str(params, "examType")?;
    let marks_obtained = agg::round2(required_f64(params, "marksObtained")?);
    let maximum_marks = match params.get("maximumMarks") {
        None | Some(serde_json::Value::Null) => 100.0,
        Some(v) => agg::round2(
            v.as_f64()
                .ok_or_else(|| HandlerErr::bad_params("maximumMarks must be a number"))?,
        ),
    };

    if marks_obtained < 0.0 || maximum_marks < 0.0 {
        return Err(HandlerErr::validation("marks must not be negative"));
    }
    // marks_obtained above maximum_marks is accepted on purpose and yields
    // a percentage above 100.

    classroom_by_id(conn, &classroom_id)?;
    let student = student_by_id(conn, &student_id)?;
    if !student.is_approved {
        // Unapproved students are invisible to staff-facing writes.
        return Err(HandlerErr::not_found("student not found"));
    }
    if !staff_has_classroom(conn, &ctx.profile_id, &classroom_id)? {
        return Err(HandlerErr::access_denied("no access to this classroom"));
    }

    let ts = now_ts();
    conn.execute(
        "INSERT INTO marks(
            id, student_id, classroom_id, subject, exam_type,
            marks_obtained, maximum_marks, entered_by, entered_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, classroom_id, subject, exam_type) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           maximum_marks = excluded.maximum_marks,
           entered_by = excluded.entered_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &classroom_id,
            &subject,
            &exam_type,
            marks_obtained,
            maximum_marks,
            &ctx.profile_id,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| HandlerErr::db_write("record mark", e))?;

    Ok(json!({
        "recorded": true,
        "percentage": agg::mark_percent(marks_obtained, maximum_marks)
    }))
}

fn list_for_student(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p = principal.ok_or_else(HandlerErr::not_authenticated)?;

    let student_id = match p.role {
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
            own
        }
        Role::Staff | Role::Hod => {
            let ctx = require_staff(principal)?;
            let student = student_by_id(conn, &required_str(params, "studentId")?)?;
            let classroom = classroom_by_id(conn, &student.classroom_id)?;
            if !staff_can_view_classroom(conn, &ctx, &classroom)? {
                return Err(HandlerErr::access_denied("no access to this classroom"));
            }
            student.id
        }
        Role::Admin => {
            return Err(HandlerErr::access_denied("student or staff access required"))
        }
    };

    let mut stmt = conn
        .prepare(
            "SELECT m.subject, m.exam_type, m.marks_obtained, m.maximum_marks,
                    u.full_name, m.entered_at
             FROM marks m
             JOIN staff_profiles sp ON sp.id = m.entered_by
             JOIN users u ON u.id = sp.user_id
             WHERE m.student_id = ?
             ORDER BY m.entered_at DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let obtained: f64 = r.get(2)?;
            let maximum: f64 = r.get(3)?;
            Ok(json!({
                "subject": r.get::<_, String>(0)?,
                "examType": r.get::<_, String>(1)?,
                "marksObtained": obtained,
                "maximumMarks": maximum,
                "percentage": agg::mark_percent(obtained, maximum),
                "enteredBy": r.get::<_, String>(4)?,
                "enteredAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let average = agg::average_marks(conn, &student_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.message))?;

    Ok(json!({
        "studentId": student_id,
        "marks": rows,
        "averageMarks": average
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
        "marks.enter" => Some(run(&|c, p| enter(c, p, &req.params))),
        "marks.listForStudent" => Some(run(&|c, p| list_for_student(c, p, &req.params))),
        _ => None,
    }
}
