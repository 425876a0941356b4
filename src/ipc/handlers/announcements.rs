use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, now_ts, optional_bool, optional_str, require_staff, required_str,
    staff_can_view_classroom, staff_has_classroom,
};
use crate::ipc::types::{AppState, Principal, Request, Role};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn create(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let classroom_id = required_str(params, "classroomId")?;
    let title = required_str(params, "title")?;
    let content = required_str(params, "content")?;
    let important = optional_bool(params, "important");

    classroom_by_id(conn, &classroom_id)?;
    if !staff_has_classroom(conn, &ctx.profile_id, &classroom_id)? {
        return Err(HandlerErr::access_denied("no access to this classroom"));
    }

    let id = Uuid::new_v4().to_string();
    let ts = now_ts();
    conn.execute(
        "INSERT INTO announcements(
            id, classroom_id, created_by, title, content, important, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &classroom_id,
            &ctx.profile_id,
            &title,
            &content,
            important as i64,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| HandlerErr::db_write("create announcement", e))?;

    Ok(json!({ "announcementId": id }))
}

fn list_rows(
    conn: &Connection,
    classroom_id: &str,
    with_read_counts: bool,
) -> Result<Vec<(String, serde_json::Value)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.content, a.important, u.full_name, a.created_at,
                    (SELECT COUNT(*) FROM announcement_reads ar WHERE ar.announcement_id = a.id)
             FROM announcements a
             JOIN staff_profiles sp ON sp.id = a.created_by
             JOIN users u ON u.id = sp.user_id
             WHERE a.classroom_id = ?
             ORDER BY a.created_at DESC",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([classroom_id], |r| {
        let id: String = r.get(0)?;
        let mut j = json!({
            "id": id.clone(),
            "title": r.get::<_, String>(1)?,
            "content": r.get::<_, String>(2)?,
            "important": r.get::<_, i64>(3)? != 0,
            "createdBy": r.get::<_, String>(4)?,
            "createdAt": r.get::<_, String>(5)?
        });
        if with_read_counts {
            j["readCount"] = json!(r.get::<_, i64>(6)?);
        }
        Ok((id, j))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

/// Students reading their classroom feed leave idempotent read receipts;
/// staff see the feed with read counts instead.
fn list_for_classroom(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p = principal.ok_or_else(HandlerErr::not_authenticated)?;

    match p.role {
        Role::Student => {
            let own_classroom = p
                .classroom_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("student classroom missing"))?;
            if let Some(requested) = optional_str(params, "classroomId") {
                if requested != own_classroom {
                    return Err(HandlerErr::access_denied(
                        "students may only view their own classroom",
                    ));
                }
            }
            let student_id = p
                .profile_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("student profile missing"))?;

            let rows = list_rows(conn, &own_classroom, false)?;
            let ts = now_ts();
            for (announcement_id, _) in &rows {
                conn.execute(
                    "INSERT OR IGNORE INTO announcement_reads(announcement_id, student_id, read_at)
                     VALUES(?, ?, ?)",
                    (announcement_id, &student_id, &ts),
                )
                .map_err(|e| HandlerErr::db_write("record announcement read", e))?;
            }

            let announcements: Vec<serde_json::Value> =
                rows.into_iter().map(|(_, j)| j).collect();
            Ok(json!({ "classroomId": own_classroom, "announcements": announcements }))
        }
        Role::Staff | Role::Hod => {
            let ctx = require_staff(principal)?;
            let classroom_id = required_str(params, "classroomId")?;
            let classroom = classroom_by_id(conn, &classroom_id)?;
            if !staff_can_view_classroom(conn, &ctx, &classroom)? {
                return Err(HandlerErr::access_denied("no access to this classroom"));
            }
            let announcements: Vec<serde_json::Value> = list_rows(conn, &classroom_id, true)?
                .into_iter()
                .map(|(_, j)| j)
                .collect();
            Ok(json!({ "classroomId": classroom_id, "announcements": announcements }))
        }
        Role::Admin => Err(HandlerErr::access_denied("student or staff access required")),
    }
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
        "announcements.create" => Some(run(&|c, p| create(c, p, &req.params))),
        "announcements.listForClassroom" => {
            Some(run(&|c, p| list_for_classroom(c, p, &req.params)))
        }
        _ => None,
    }
}
