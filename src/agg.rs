use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AggError {
    pub code: String,
    pub message: String,
}

impl AggError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// present/total as a percentage. Guards the zero-row case: no recorded
/// days means 0.0, not NaN.
pub fn attendance_percent(present: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (present as f64 / total as f64) * 100.0
}

/// marks_obtained/maximum_marks as a percentage. None when the maximum is
/// zero; values above the maximum are allowed and yield >100.
pub fn mark_percent(obtained: f64, maximum: f64) -> Option<f64> {
    if maximum == 0.0 {
        return None;
    }
    Some((obtained / maximum) * 100.0)
}

/// Marks are entered to two decimal places; normalize before storing.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTotals {
    pub total_days: i64,
    pub present_days: i64,
    pub percentage: f64,
}

/// Count attendance rows for (student, classroom), optionally restricted to
/// an inclusive [start, end] date range. Dates are stored ISO so BETWEEN on
/// the text column compares correctly.
pub fn attendance_totals(
    conn: &Connection,
    student_id: &str,
    classroom_id: &str,
    range: Option<(NaiveDate, NaiveDate)>,
) -> Result<AttendanceTotals, AggError> {
    let (total, present): (i64, i64) = match range {
        Some((start, end)) => conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'P'), 0)
                 FROM attendance
                 WHERE student_id = ? AND classroom_id = ? AND date BETWEEN ? AND ?",
                (
                    student_id,
                    classroom_id,
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string(),
                ),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| AggError::new("db_query_failed", e.to_string()))?,
        None => conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'P'), 0)
                 FROM attendance
                 WHERE student_id = ? AND classroom_id = ?",
                (student_id, classroom_id),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| AggError::new("db_query_failed", e.to_string()))?,
    };

    Ok(AttendanceTotals {
        total_days: total,
        present_days: present,
        percentage: attendance_percent(present, total),
    })
}

/// Arithmetic mean of marks_obtained over all of a student's mark rows.
/// None when the student has no marks at all; the report layer must render
/// that as "no data" rather than 0.
pub fn average_marks(conn: &Connection, student_id: &str) -> Result<Option<f64>, AggError> {
    conn.query_row(
        "SELECT AVG(marks_obtained) FROM marks WHERE student_id = ?",
        [student_id],
        |r| r.get::<_, Option<f64>>(0),
    )
    .optional()
    .map(|v| v.flatten())
    .map_err(|e| AggError::new("db_query_failed", e.to_string()))
}
