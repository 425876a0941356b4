use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, require_hod, require_staff, required_str, staff_can_view_classroom,
    student_by_id,
};
use crate::ipc::types::{AppState, Principal, Request};
use rusqlite::Connection;
use serde_json::json;

fn list_by_classroom(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let classroom_id = required_str(params, "classroomId")?;
    let classroom = classroom_by_id(conn, &classroom_id)?;
    if !staff_can_view_classroom(conn, &ctx, &classroom)? {
        return Err(HandlerErr::access_denied("no access to this classroom"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.roll_no, u.full_name, s.phone, s.created_at
             FROM student_profiles s
             JOIN users u ON u.id = s.user_id
             WHERE s.classroom_id = ? AND s.is_approved = 1
             ORDER BY s.roll_no",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "rollNo": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "phone": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "classroom": { "id": classroom.id, "name": classroom.name },
        "students": students
    }))
}

fn pending_approvals(
    conn: &Connection,
    principal: Option<&Principal>,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_hod(principal)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.roll_no, u.full_name, c.name, s.created_at
             FROM student_profiles s
             JOIN users u ON u.id = s.user_id
             JOIN classrooms c ON c.id = s.classroom_id
             WHERE s.department_id = ? AND s.is_approved = 0
             ORDER BY s.created_at",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&ctx.department_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "rollNo": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "classroomName": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "students": students }))
}

/// Approval is idempotent: re-approving an approved student is a no-op.
fn approve(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_staff(principal)?;
    let student_id = required_str(params, "studentId")?;
    let student = student_by_id(conn, &student_id)?;

    if !student.is_approved {
        conn.execute(
            "UPDATE student_profiles SET is_approved = 1 WHERE id = ?",
            [&student_id],
        )
        .map_err(|e| HandlerErr::db_write("approve student", e))?;
    }

    Ok(json!({
        "studentId": student_id,
        "isApproved": true,
        "alreadyApproved": student.is_approved
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
        "students.listByClassroom" => Some(run(&|c, p| list_by_classroom(c, p, &req.params))),
        "students.pendingApprovals" => Some(run(&|c, p| pending_approvals(c, p))),
        "students.approve" => Some(run(&|c, p| approve(c, p, &req.params))),
        _ => None,
    }
}
