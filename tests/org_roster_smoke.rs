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

#[test]
fn health_and_workspace_lifecycle() {
    let workspace = temp_dir("deptd-smoke-ws");
    let (mut child, mut stdin, mut reader) = spawn_daemon();

    let health = request_ok(&mut stdin, &mut reader, "h1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert!(health["role"].is_null());

    request_err(
        &mut stdin,
        &mut reader,
        "early",
        "departments.list",
        json!({}),
        "no_workspace",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "unknown",
        "no.such.method",
        json!({}),
        "not_implemented",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let health = request_ok(&mut stdin, &mut reader, "h2", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    request_err(
        &mut stdin,
        &mut reader,
        "ghost",
        "session.login",
        json!({ "username": "nobody" }),
        "not_found",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn org_setup_enforces_uniqueness() {
    let workspace = temp_dir("deptd-smoke-org");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "departments.create",
        json!({ "name": "Commerce", "code": "COM" }),
    )["departmentId"]
        .as_str()
        .expect("departmentId")
        .to_string();
    request_err(
        &mut stdin,
        &mut reader,
        "d2",
        "departments.create",
        json!({ "name": "Commerce Again", "code": "COM" }),
        "validation_error",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.Com",
            "classCode": "I_BCOM",
            "academicYear": "2025-26"
        }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "c2",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.Com copy",
            "classCode": "I_BCOM",
            "academicYear": "2025-26"
        }),
        "validation_error",
    );
    // Same class code in a different academic year is a new classroom.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c3",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.Com",
            "classCode": "I_BCOM",
            "academicYear": "2026-27"
        }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "c4",
        "classrooms.create",
        json!({
            "departmentId": "missing-dept",
            "name": "Orphan",
            "classCode": "ORPH",
            "academicYear": "2025-26"
        }),
        "not_found",
    );

    let listed = request_ok(&mut stdin, &mut reader, "dl", "departments.list", json!({}));
    let departments = listed["departments"].as_array().expect("departments");
    assert_eq!(departments.len(), 1);
    assert_eq!(departments[0]["classroomCount"].as_i64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn approval_flow_gates_roster_visibility() {
    let workspace = temp_dir("deptd-smoke-approve");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "departments.create",
        json!({ "name": "History", "code": "HIS" }),
    )["departmentId"]
        .as_str()
        .expect("departmentId")
        .to_string();
    let classroom = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.A History",
            "classCode": "I_BA_HIS",
            "academicYear": "2025-26"
        }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let hod = request_ok(
        &mut stdin,
        &mut reader,
        "hod",
        "staff.register",
        json!({
            "username": "george",
            "fullName": "George Thomas",
            "staffId": "STF30",
            "departmentId": dept,
            "designation": "Professor & Head",
            "isHod": true
        }),
    )["staffProfileId"]
        .as_str()
        .expect("staffProfileId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "staff.assignClassroom",
        json!({ "staffProfileId": hod, "classroomId": classroom }),
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.register",
        json!({
            "username": "fatima",
            "fullName": "Fatima Beevi",
            "rollNo": "HI001",
            "departmentId": dept,
            "classroomId": classroom
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    request_err(
        &mut stdin,
        &mut reader,
        "dup-user",
        "students.register",
        json!({
            "username": "fatima",
            "fullName": "Duplicate",
            "rollNo": "HI002",
            "departmentId": dept,
            "classroomId": classroom
        }),
        "validation_error",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "dup-roll",
        "students.register",
        json!({
            "username": "someoneelse",
            "fullName": "Duplicate Roll",
            "rollNo": "HI001",
            "departmentId": dept,
            "classroomId": classroom
        }),
        "validation_error",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "session.login",
        json!({ "username": "george" }),
    );

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "pend",
        "students.pendingApprovals",
        json!({}),
    );
    assert_eq!(pending["students"].as_array().map(|a| a.len()), Some(1));

    // Unapproved students stay off the class roster.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "roster0",
        "students.listByClassroom",
        json!({ "classroomId": classroom }),
    );
    assert_eq!(roster["students"].as_array().map(|a| a.len()), Some(0));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "students.approve",
        json!({ "studentId": student }),
    );
    assert_eq!(approved["alreadyApproved"].as_bool(), Some(false));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "ap2",
        "students.approve",
        json!({ "studentId": student }),
    );
    assert_eq!(again["alreadyApproved"].as_bool(), Some(true));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "roster1",
        "students.listByClassroom",
        json!({ "classroomId": classroom }),
    );
    let students = roster["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["rollNo"].as_str(), Some("HI001"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn announcements_and_lectures_reach_the_classroom() {
    let workspace = temp_dir("deptd-smoke-feed");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "departments.create",
        json!({ "name": "English", "code": "ENG" }),
    )["departmentId"]
        .as_str()
        .expect("departmentId")
        .to_string();
    let classroom = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classrooms.create",
        json!({
            "departmentId": dept,
            "name": "I B.A English",
            "classCode": "I_BA_ENG",
            "academicYear": "2025-26"
        }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let staff = request_ok(
        &mut stdin,
        &mut reader,
        "staff",
        "staff.register",
        json!({
            "username": "nisha",
            "fullName": "Nisha Varma",
            "staffId": "STF40",
            "departmentId": dept,
            "designation": "Assistant Professor"
        }),
    )["staffProfileId"]
        .as_str()
        .expect("staffProfileId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "staff.assignClassroom",
        json!({ "staffProfileId": staff, "classroomId": classroom }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.register",
        json!({
            "username": "rahul",
            "fullName": "Rahul Menon",
            "rollNo": "EN001",
            "departmentId": dept,
            "classroomId": classroom
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-staff",
        "session.login",
        json!({ "username": "nisha" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "students.approve",
        json!({ "studentId": student }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ann",
        "announcements.create",
        json!({
            "classroomId": classroom,
            "title": "Internal exam schedule",
            "content": "Internals start Monday.",
            "important": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "lec",
        "lectures.add",
        json!({
            "classroomId": classroom,
            "title": "Chaucer notes",
            "description": "Week 3 slides",
            "filePath": "uploads/chaucer.pdf"
        }),
    );

    // Student reads the feed; reading twice leaves a single receipt.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-student",
        "session.login",
        json!({ "username": "rahul" }),
    );
    for pass in 0..2 {
        let feed = request_ok(
            &mut stdin,
            &mut reader,
            &format!("feed{}", pass),
            "announcements.listForClassroom",
            json!({}),
        );
        let anns = feed["announcements"].as_array().expect("announcements");
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0]["important"].as_bool(), Some(true));
    }
    let lectures = request_ok(
        &mut stdin,
        &mut reader,
        "lecs",
        "lectures.listForClassroom",
        json!({}),
    );
    assert_eq!(
        lectures["lectures"].as_array().map(|a| a.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login-staff2",
        "session.login",
        json!({ "username": "nisha" }),
    );
    let staff_view = request_ok(
        &mut stdin,
        &mut reader,
        "staff-feed",
        "announcements.listForClassroom",
        json!({ "classroomId": classroom }),
    );
    let anns = staff_view["announcements"].as_array().expect("announcements");
    assert_eq!(anns[0]["readCount"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
