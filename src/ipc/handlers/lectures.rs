use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, now_ts, optional_str, require_staff, required_str, staff_can_view_classroom,
    staff_has_classroom,
};
use crate::ipc::types::{AppState, Principal, Request, Role};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// The file itself lives outside the store; we keep an opaque path.
fn add(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_staff(principal)?;
    let classroom_id = required_str(params, "classroomId")?;
    let title = required_str(params, "title")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let file_path = required_str(params, "filePath")?;

    classroom_by_id(conn, &classroom_id)?;
    if !staff_has_classroom(conn, &ctx.profile_id, &classroom_id)? {
        return Err(HandlerErr::access_denied("no access to this classroom"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lectures(
            id, classroom_id, uploaded_by, title, description, file_path, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &classroom_id,
            &ctx.profile_id,
            &title,
            &description,
            &file_path,
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::db_write("add lecture", e))?;

    Ok(json!({ "lectureId": id }))
}

fn list_for_classroom(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p = principal.ok_or_else(HandlerErr::not_authenticated)?;

    let classroom_id = match p.role {
        Role::Student => {
            let own = p
                .classroom_id
                .clone()
                .ok_or_else(|| HandlerErr::access_denied("student classroom missing"))?;
            if let Some(requested) = optional_str(params, "classroomId") {
                if requested != own {
                    return Err(HandlerErr::access_denied(
                        "students may only view their own classroom",
                    ));
                }
            }
            own
        }
        Role::Staff | Role::Hod => {
            let ctx = require_staff(principal)?;
            let classroom_id = required_str(params, "classroomId")?;
            let classroom = classroom_by_id(conn, &classroom_id)?;
            if !staff_can_view_classroom(conn, &ctx, &classroom)? {
                return Err(HandlerErr::access_denied("no access to this classroom"));
            }
            classroom_id
        }
        Role::Admin => {
            return Err(HandlerErr::access_denied("student or staff access required"))
        }
    };

    let mut stmt = conn
        .prepare(
            "SELECT l.id, l.title, l.description, l.file_path, u.full_name, l.uploaded_at
             FROM lectures l
             JOIN staff_profiles sp ON sp.id = l.uploaded_by
             JOIN users u ON u.id = sp.user_id
             WHERE l.classroom_id = ?
             ORDER BY l.uploaded_at DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let lectures = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "filePath": r.get::<_, String>(3)?,
                "uploadedBy": r.get::<_, String>(4)?,
                "uploadedAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "classroomId": classroom_id, "lectures": lectures }))
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
        "lectures.add" => Some(run(&|c, p| add(c, p, &req.params))),
        "lectures.listForClassroom" => Some(run(&|c, p| list_for_classroom(c, p, &req.params))),
        _ => None,
    }
}
