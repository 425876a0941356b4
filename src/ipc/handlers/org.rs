use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, now_ts, optional_bool, optional_str, parse_iso_date, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn row_exists(
    conn: &Connection,
    sql: &str,
    param: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [param], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn department_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let established = match optional_str(params, "establishedDate") {
        Some(s) => Some(parse_iso_date(&s)?.format("%Y-%m-%d").to_string()),
        None => None,
    };

    if row_exists(conn, "SELECT 1 FROM departments WHERE code = ?", &code)? {
        return Err(HandlerErr::validation("department code already in use"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, name, code, description, established_date)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &code, &description, &established),
    )
    .map_err(|e| HandlerErr::db_write("create department", e))?;

    Ok(json!({ "departmentId": id, "name": name, "code": code }))
}

fn department_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Include counts so a dashboard can render without extra round trips.
    let mut stmt = conn
        .prepare(
            "SELECT
               d.id, d.name, d.code, d.description, d.established_date,
               (SELECT COUNT(*) FROM classrooms c WHERE c.department_id = d.id) AS classroom_count,
               (SELECT COUNT(*) FROM student_profiles s
                 WHERE s.department_id = d.id AND s.is_approved = 1) AS student_count
             FROM departments d
             ORDER BY d.name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "establishedDate": r.get::<_, Option<String>>(4)?,
                "classroomCount": r.get::<_, i64>(5)?,
                "studentCount": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "departments": rows }))
}

fn classroom_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    let name = required_str(params, "name")?;
    let class_code = required_str(params, "classCode")?;
    let academic_year = required_str(params, "academicYear")?;

    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }
    let dup: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE class_code = ? AND academic_year = ?",
            (&class_code, &academic_year),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if dup.is_some() {
        return Err(HandlerErr::validation(
            "classroom already exists for this class code and academic year",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, department_id, name, class_code, academic_year)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &department_id, &name, &class_code, &academic_year),
    )
    .map_err(|e| HandlerErr::db_write("create classroom", e))?;

    Ok(json!({ "classroomId": id, "name": name }))
}

fn classroom_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, class_code, academic_year
             FROM classrooms WHERE department_id = ? ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&department_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "classCode": r.get::<_, String>(2)?,
                "academicYear": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classrooms": rows }))
}

/// Registration creates the identity row and the profile together, in one
/// transaction. Profile creation is an explicit step here, not a side
/// effect of saving the user.
fn student_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let full_name = required_str(params, "fullName")?;
    let roll_no = required_str(params, "rollNo")?;
    let department_id = required_str(params, "departmentId")?;
    let classroom_id = required_str(params, "classroomId")?;
    let phone = optional_str(params, "phone").unwrap_or_default();
    let address = optional_str(params, "address").unwrap_or_default();
    let date_of_birth = match optional_str(params, "dateOfBirth") {
        Some(s) => Some(parse_iso_date(&s)?.format("%Y-%m-%d").to_string()),
        None => None,
    };

    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }
    let classroom = classroom_by_id(conn, &classroom_id)?;
    if classroom.department_id != department_id {
        return Err(HandlerErr::validation(
            "classroom does not belong to the chosen department",
        ));
    }
    if row_exists(conn, "SELECT 1 FROM users WHERE username = ?", &username)? {
        return Err(HandlerErr::validation("username already in use"));
    }
    if row_exists(conn, "SELECT 1 FROM student_profiles WHERE roll_no = ?", &roll_no)? {
        return Err(HandlerErr::validation("roll number already in use"));
    }

    let user_id = Uuid::new_v4().to_string();
    let profile_id = Uuid::new_v4().to_string();
    let ts = now_ts();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db_write("register student", e))?;
    tx.execute(
        "INSERT INTO users(id, username, full_name, is_admin) VALUES(?, ?, ?, 0)",
        (&user_id, &username, &full_name),
    )
    .map_err(|e| HandlerErr::db_write("register student", e))?;
    tx.execute(
        "INSERT INTO student_profiles(
            id, user_id, roll_no, department_id, classroom_id,
            phone, address, date_of_birth, is_approved, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &profile_id,
            &user_id,
            &roll_no,
            &department_id,
            &classroom_id,
            &phone,
            &address,
            &date_of_birth,
            &ts,
        ),
    )
    .map_err(|e| HandlerErr::db_write("register student", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db_write("register student", e))?;

    Ok(json!({
        "userId": user_id,
        "studentId": profile_id,
        "rollNo": roll_no,
        "isApproved": false
    }))
}

fn staff_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let full_name = required_str(params, "fullName")?;
    let staff_no = required_str(params, "staffId")?;
    let department_id = required_str(params, "departmentId")?;
    let designation = optional_str(params, "designation").unwrap_or_default();
    let is_hod = optional_bool(params, "isHod");

    if !row_exists(conn, "SELECT 1 FROM departments WHERE id = ?", &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }
    if row_exists(conn, "SELECT 1 FROM users WHERE username = ?", &username)? {
        return Err(HandlerErr::validation("username already in use"));
    }
    if row_exists(conn, "SELECT 1 FROM staff_profiles WHERE staff_id = ?", &staff_no)? {
        return Err(HandlerErr::validation("staff id already in use"));
    }

    let user_id = Uuid::new_v4().to_string();
    let profile_id = Uuid::new_v4().to_string();
    let ts = now_ts();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db_write("register staff", e))?;
    tx.execute(
        "INSERT INTO users(id, username, full_name, is_admin) VALUES(?, ?, ?, 0)",
        (&user_id, &username, &full_name),
    )
    .map_err(|e| HandlerErr::db_write("register staff", e))?;
    tx.execute(
        "INSERT INTO staff_profiles(
            id, user_id, staff_id, department_id, designation,
            is_hod, is_approved, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &profile_id,
            &user_id,
            &staff_no,
            &department_id,
            &designation,
            is_hod as i64,
            &ts,
        ),
    )
    .map_err(|e| HandlerErr::db_write("register staff", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db_write("register staff", e))?;

    Ok(json!({
        "userId": user_id,
        "staffProfileId": profile_id,
        "isHod": is_hod
    }))
}

fn staff_assign_classroom(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_profile_id = required_str(params, "staffProfileId")?;
    let classroom_id = required_str(params, "classroomId")?;

    if !row_exists(conn, "SELECT 1 FROM staff_profiles WHERE id = ?", &staff_profile_id)? {
        return Err(HandlerErr::not_found("staff profile not found"));
    }
    classroom_by_id(conn, &classroom_id)?;

    // Re-assigning is a no-op.
    conn.execute(
        "INSERT OR IGNORE INTO staff_classes(staff_profile_id, classroom_id) VALUES(?, ?)",
        (&staff_profile_id, &classroom_id),
    )
    .map_err(|e| HandlerErr::db_write("assign classroom", e))?;

    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.create" => Some(with_conn(state, req, |c| department_create(c, &req.params))),
        "departments.list" => Some(with_conn(state, req, department_list)),
        "classrooms.create" => Some(with_conn(state, req, |c| classroom_create(c, &req.params))),
        "classrooms.list" => Some(with_conn(state, req, |c| classroom_list(c, &req.params))),
        "students.register" => Some(with_conn(state, req, |c| student_register(c, &req.params))),
        "staff.register" => Some(with_conn(state, req, |c| staff_register(c, &req.params))),
        "staff.assignClassroom" => {
            Some(with_conn(state, req, |c| staff_assign_classroom(c, &req.params)))
        }
        _ => None,
    }
}
