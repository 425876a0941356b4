use crate::agg;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    classroom_by_id, optional_str, parse_iso_date, require_hod, required_str, ClassroomRow,
    StaffCtx,
};
use crate::ipc::types::{AppState, Principal, Request};
use crate::report;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// The performance report renders at most this many students. Kept from
/// the portal this replaces; lifting it means redesigning the pagination
/// contract with the frontend.
const PERFORMANCE_REPORT_CAP: usize = 20;

fn hod_dashboard(
    conn: &Connection,
    principal: Option<&Principal>,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_hod(principal)?;

    let (students, staff, classrooms, pending): (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM student_profiles
                 WHERE department_id = ?1 AND is_approved = 1),
               (SELECT COUNT(*) FROM staff_profiles
                 WHERE department_id = ?1 AND is_approved = 1),
               (SELECT COUNT(*) FROM classrooms WHERE department_id = ?1),
               (SELECT COUNT(*) FROM student_profiles
                 WHERE department_id = ?1 AND is_approved = 0)",
            [&ctx.department_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .map_err(HandlerErr::db_query)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.created_at
             FROM announcements a
             JOIN classrooms c ON c.id = a.classroom_id
             WHERE c.department_id = ?
             ORDER BY a.created_at DESC
             LIMIT 5",
        )
        .map_err(HandlerErr::db_query)?;
    let recent = stmt
        .query_map([&ctx.department_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "departmentId": ctx.department_id,
        "totalStudents": students,
        "totalStaff": staff,
        "totalClassrooms": classrooms,
        "pendingApprovals": pending,
        "recentAnnouncements": recent
    }))
}

/// Reports run under the HOD's own department; an explicit classroom
/// filter must point inside it.
fn scoped_classroom(
    conn: &Connection,
    ctx: &StaffCtx,
    params: &serde_json::Value,
) -> Result<Option<ClassroomRow>, HandlerErr> {
    let Some(classroom_id) = optional_str(params, "classroomId") else {
        return Ok(None);
    };
    let classroom = classroom_by_id(conn, &classroom_id)?;
    if classroom.department_id != ctx.department_id {
        return Err(HandlerErr::access_denied(
            "classroom is outside your department",
        ));
    }
    Ok(Some(classroom))
}

fn roster_in_scope(
    conn: &Connection,
    department_id: &str,
    classroom: Option<&ClassroomRow>,
    limit: Option<usize>,
) -> Result<Vec<(String, String, String)>, HandlerErr> {
    let base = "SELECT s.id, s.roll_no, u.full_name
         FROM student_profiles s
         JOIN users u ON u.id = s.user_id
         WHERE s.department_id = ?1 AND s.is_approved = 1";
    let sql = match (classroom.is_some(), limit) {
        (true, Some(n)) => format!(
            "{} AND s.classroom_id = ?2 ORDER BY s.roll_no LIMIT {}",
            base, n
        ),
        (true, None) => format!("{} AND s.classroom_id = ?2 ORDER BY s.roll_no", base),
        (false, Some(n)) => format!("{} ORDER BY s.roll_no LIMIT {}", base, n),
        (false, None) => format!("{} ORDER BY s.roll_no", base),
    };

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    };
    let rows = match classroom {
        Some(c) => stmt
            .query_map((department_id, &c.id), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([department_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };
    rows.map_err(HandlerErr::db_query)
}

fn create_out_file(path: &str) -> Result<File, HandlerErr> {
    let out = PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "export_write_failed",
            message: e.to_string(),
            details: Some(json!({ "path": path })),
        })?;
    }
    File::create(&out).map_err(|e| HandlerErr {
        code: "export_write_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    })
}

fn attendance_csv(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_hod(principal)?;
    let start = parse_iso_date(&required_str(params, "startDate")?)?;
    let end = parse_iso_date(&required_str(params, "endDate")?)?;
    let out_path = required_str(params, "outPath")?;
    let classroom = scoped_classroom(conn, &ctx, params)?;

    let roster = roster_in_scope(conn, &ctx.department_id, classroom.as_ref(), None)?;

    let mut rows = Vec::with_capacity(roster.len());
    for (student_id, roll_no, full_name) in roster {
        let classroom_id = match &classroom {
            Some(c) => c.id.clone(),
            None => {
                // Department-wide report counts against each student's own
                // classroom.
                conn.query_row(
                    "SELECT classroom_id FROM student_profiles WHERE id = ?",
                    [&student_id],
                    |r| r.get::<_, String>(0),
                )
                .map_err(HandlerErr::db_query)?
            }
        };
        let totals =
            agg::attendance_totals(conn, &student_id, &classroom_id, Some((start, end)))
                .map_err(|e| HandlerErr::new("db_query_failed", e.message))?;
        rows.push(report::AttendanceReportRow {
            roll_no,
            full_name,
            total_days: totals.total_days,
            present_days: totals.present_days,
            percentage: totals.percentage,
        });
    }

    let mut out = BufWriter::new(create_out_file(&out_path)?);
    let rows_written = report::write_attendance_csv(&mut out, rows)
        .map_err(|e| HandlerErr::new("export_write_failed", e.to_string()))?;
    out.flush()
        .map_err(|e| HandlerErr::new("export_write_failed", e.to_string()))?;

    Ok(json!({ "path": out_path, "rowsWritten": rows_written }))
}

fn performance_pdf(
    conn: &Connection,
    principal: Option<&Principal>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_hod(principal)?;
    let out_path = required_str(params, "outPath")?;
    let classroom = scoped_classroom(conn, &ctx, params)?;

    let department_name: String = conn
        .query_row(
            "SELECT name FROM departments WHERE id = ?",
            [&ctx.department_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let roster = roster_in_scope(
        conn,
        &ctx.department_id,
        classroom.as_ref(),
        Some(PERFORMANCE_REPORT_CAP),
    )?;

    let mut rows = Vec::with_capacity(roster.len());
    for (student_id, roll_no, full_name) in roster {
        let average = agg::average_marks(conn, &student_id)
            .map_err(|e| HandlerErr::new("db_query_failed", e.message))?;
        rows.push(report::PerformanceReportRow {
            roll_no,
            full_name,
            average_marks: average,
        });
    }

    let generated_at = Utc::now().format("%Y-%m-%d %H:%M").to_string();
    let doc = report::render_performance_pdf(
        &department_name,
        classroom.as_ref().map(|c| c.name.as_str()),
        &generated_at,
        &rows,
    );

    let mut out = BufWriter::new(create_out_file(&out_path)?);
    doc.write_to(&mut out)
        .map_err(|e| HandlerErr::new("export_write_failed", e.to_string()))?;
    out.flush()
        .map_err(|e| HandlerErr::new("export_write_failed", e.to_string()))?;

    Ok(json!({
        "path": out_path,
        "studentCount": rows.len(),
        "cap": PERFORMANCE_REPORT_CAP
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
        "reports.hodDashboard" => Some(run(&|c, p| hod_dashboard(c, p))),
        "reports.attendanceCsv" => Some(run(&|c, p| attendance_csv(c, p, &req.params))),
        "reports.performancePdf" => Some(run(&|c, p| performance_pdf(c, p, &req.params))),
        _ => None,
    }
}
