use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Principal, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "role": state.principal.as_ref().map(|p| p.role.as_str())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A workspace switch invalidates the session.
            state.principal = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// Resolve the role tag once, at the session boundary. Admin flag wins,
/// then a staff profile (is_hod promotes to Hod), then a student profile.
fn resolve_principal(conn: &Connection, username: &str) -> Result<Principal, HandlerErr> {
    let user: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT id, full_name, is_admin FROM users WHERE username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((user_id, full_name, is_admin)) = user else {
        return Err(HandlerErr::not_found("user not found"));
    };

    if is_admin != 0 {
        return Ok(Principal {
            user_id,
            full_name,
            role: Role::Admin,
            profile_id: None,
            department_id: None,
            classroom_id: None,
        });
    }

    let staff: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT id, department_id, is_hod FROM staff_profiles WHERE user_id = ?",
            [&user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if let Some((profile_id, department_id, is_hod)) = staff {
        return Ok(Principal {
            user_id,
            full_name,
            role: if is_hod != 0 { Role::Hod } else { Role::Staff },
            profile_id: Some(profile_id),
            department_id: Some(department_id),
            classroom_id: None,
        });
    }

    let student: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, department_id, classroom_id FROM student_profiles WHERE user_id = ?",
            [&user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if let Some((profile_id, department_id, classroom_id)) = student {
        return Ok(Principal {
            user_id,
            full_name,
            role: Role::Student,
            profile_id: Some(profile_id),
            department_id: Some(department_id),
            classroom_id: Some(classroom_id),
        });
    }

    Err(HandlerErr::validation("user has no profile"))
}

fn handle_session_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let username = match required_str(&req.params, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match resolve_principal(conn, &username) {
        Ok(principal) => {
            let summary = json!({
                "userId": principal.user_id,
                "fullName": principal.full_name,
                "role": principal.role.as_str(),
                "profileId": principal.profile_id,
                "departmentId": principal.department_id,
                "classroomId": principal.classroom_id
            });
            state.principal = Some(principal);
            ok(&req.id, summary)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_session_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.principal = None;
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.login" => Some(handle_session_login(state, req)),
        "session.logout" => Some(handle_session_logout(state, req)),
        _ => None,
    }
}
