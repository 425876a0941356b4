use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_deptd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn deptd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    expect_code: &str,
) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert_eq!(code, expect_code, "wrong error code: {}", value);
}

struct Seed {
    classroom: String,
    first_student: String,
}

/// A department with 25 approved students (plus one pending), an HOD, and
/// an ordinary staff member who marks attendance for the first student.
fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seed {
    let dept = request_ok(
        stdin,
        reader,
        "d1",
        "departments.create",
        json!({ "name": "Chemistry", "code": "CHE" }),
    )["departmentId"]
        .as_str()
        .expect("departmentId")
        .to_string();
    let classroom = request_ok(
        stdin,
        reader,
        "c1",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.Sc Chemistry",
            "classCode": "I_BSC_CHE",
            "academicYear": "2025-26"
        }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "c2",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "II B.Sc Chemistry",
            "classCode": "II_BSC_CHE",
            "academicYear": "2025-26"
        }),
    );

    let _ = request_ok(
        stdin,
        reader,
        "hod",
        "staff.register",
        json!({
            "username": "devi",
            "fullName": "Devi Pillai",
            "staffId": "STF20",
            "departmentId": dept,
            "designation": "Professor & Head",
            "isHod": true
        }),
    );
    let staff = request_ok(
        stdin,
        reader,
        "staff",
        "staff.register",
        json!({
            "username": "mohan",
            "fullName": "Mohan Iyer",
            "staffId": "STF21",
            "departmentId": dept,
            "designation": "Assistant Professor"
        }),
    )["staffProfileId"]
        .as_str()
        .expect("staffProfileId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "assign",
        "staff.assignClassroom",
        json!({ "staffProfileId": staff, "classroomId": classroom }),
    );

    // Register in reverse roll order; reports must still sort by roll.
    let mut students = Vec::new();
    for i in (1..=25).rev() {
        let sid = request_ok(
            stdin,
            reader,
            &format!("s{}", i),
            "students.register",
            json!({
                "username": format!("che{}", i),
                "fullName": format!("Chem Student {}", i),
                "rollNo": format!("CH{:03}", i),
                "departmentId": dept,
                "classroomId": classroom
            }),
        )["studentId"]
            .as_str()
            .expect("studentId")
            .to_string();
        students.push((i, sid));
    }
    let _ = request_ok(
        stdin,
        reader,
        "pend",
        "students.register",
        json!({
            "username": "che99",
            "fullName": "Pending Student",
            "rollNo": "CH099",
            "departmentId": dept,
            "classroomId": classroom
        }),
    );

    let _ = request_ok(
        stdin,
        reader,
        "login-staff",
        "session.login",
        json!({ "username": "mohan" }),
    );
    for (i, sid) in &students {
        let _ = request_ok(
            stdin,
            reader,
            &format!("ap{}", i),
            "students.approve",
            json!({ "studentId": sid }),
        );
    }

    let first_student = students
        .iter()
        .find(|(i, _)| *i == 1)
        .map(|(_, sid)| sid.clone())
        .expect("first student");
    for day in 1..=30 {
        let status = if day <= 27 { "P" } else { "A" };
        let _ = request_ok(
            stdin,
            reader,
            &format!("att{}", day),
            "attendance.mark",
            json!({
                "studentId": first_student,
                "classroomId": classroom,
                "date": format!("2025-01-{:02}", day),
                "status": status
            }),
        );
    }

    Seed {
        classroom,
        first_student,
    }
}

#[test]
fn dashboard_counts_reflect_department_state() {
    let workspace = temp_dir("deptd-dash");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _seed = seed(&mut stdin, &mut reader);

    // Ordinary staff may not see the dashboard.
    request_err(
        &mut stdin,
        &mut reader,
        "staff-dash",
        "reports.hodDashboard",
        json!({}),
        "access_denied",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-hod",
        "session.login",
        json!({ "username": "devi" }),
    );
    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "dash",
        "reports.hodDashboard",
        json!({}),
    );
    assert_eq!(dash["totalStudents"].as_i64(), Some(25));
    assert_eq!(dash["pendingApprovals"].as_i64(), Some(1));
    assert_eq!(dash["totalClassrooms"].as_i64(), Some(2));
    assert_eq!(dash["totalStaff"].as_i64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_csv_is_sorted_and_formatted() {
    let workspace = temp_dir("deptd-csv");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed(&mut stdin, &mut reader);

    let out_path = workspace.join("exports").join("attendance.csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-hod",
        "session.login",
        json!({ "username": "devi" }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "csv",
        "reports.attendanceCsv",
        json!({
            "classroomId": seed.classroom,
            "startDate": "2025-01-01",
            "endDate": "2025-01-31",
            "outPath": out_path.to_string_lossy()
        }),
    );
    assert_eq!(result["rowsWritten"].as_i64(), Some(25));

    let body = std::fs::read_to_string(&out_path).expect("read csv");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 26);
    assert_eq!(
        lines[0],
        "Roll No,Student Name,Total Days,Present Days,Attendance %"
    );
    assert_eq!(lines[1], "CH001,Chem Student 1,30,27,90.00%");
    // No attendance marked for the rest of the roster.
    assert_eq!(lines[2], "CH002,Chem Student 2,0,0,0.00%");
    let rolls: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap_or(""))
        .collect();
    let mut sorted = rolls.clone();
    sorted.sort();
    assert_eq!(rolls, sorted, "rows must be ordered by roll number");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn performance_pdf_caps_the_roster() {
    let workspace = temp_dir("deptd-pdf");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "marks.enter",
        json!({
            "studentId": seed.first_student,
            "classroomId": seed.classroom,
            "subject": "Organic Chemistry",
            "examType": "internal1",
            "marksObtained": 27.0,
            "maximumMarks": 30.0
        }),
    );

    let out_path = workspace.join("exports").join("performance.pdf");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-hod",
        "session.login",
        json!({ "username": "devi" }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "pdf",
        "reports.performancePdf",
        json!({
            "classroomId": seed.classroom,
            "outPath": out_path.to_string_lossy()
        }),
    );
    // 25 approved students, but the report stops at 20.
    assert_eq!(result["studentCount"].as_i64(), Some(20));
    assert_eq!(result["cap"].as_i64(), Some(20));

    let bytes = std::fs::read(&out_path).expect("read pdf");
    assert!(bytes.starts_with(b"%PDF-1.4"), "not a pdf header");
    assert!(bytes.ends_with(b"%%EOF\n") || bytes.windows(5).any(|w| w == b"%%EOF"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exports_require_hod_and_complete_params() {
    let workspace = temp_dir("deptd-report-auth");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed(&mut stdin, &mut reader);
    let out_path = workspace.join("out.csv");

    // Still logged in as the ordinary staff member after seeding.
    request_err(
        &mut stdin,
        &mut reader,
        "staff-csv",
        "reports.attendanceCsv",
        json!({
            "classroomId": seed.classroom,
            "startDate": "2025-01-01",
            "endDate": "2025-01-31",
            "outPath": out_path.to_string_lossy()
        }),
        "access_denied",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-hod",
        "session.login",
        json!({ "username": "devi" }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "no-range",
        "reports.attendanceCsv",
        json!({
            "classroomId": seed.classroom,
            "outPath": out_path.to_string_lossy()
        }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "bad-range",
        "reports.attendanceCsv",
        json!({
            "classroomId": seed.classroom,
            "startDate": "01/01/2025",
            "endDate": "2025-01-31",
            "outPath": out_path.to_string_lossy()
        }),
        "invalid_date",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
