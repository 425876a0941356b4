use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("deptportal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            established_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            department_id TEXT NOT NULL,
            name TEXT NOT NULL,
            class_code TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(class_code, academic_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_department ON classrooms(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_profiles(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_no TEXT NOT NULL UNIQUE,
            department_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            photo_path TEXT,
            date_of_birth TEXT,
            is_approved INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_profiles_classroom ON student_profiles(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_profiles_department ON student_profiles(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff_profiles(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            staff_id TEXT NOT NULL UNIQUE,
            department_id TEXT NOT NULL,
            designation TEXT NOT NULL DEFAULT '',
            is_hod INTEGER NOT NULL DEFAULT 0,
            is_approved INTEGER NOT NULL DEFAULT 1,
            photo_path TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_profiles_department ON staff_profiles(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff_classes(
            staff_profile_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            PRIMARY KEY(staff_profile_id, classroom_id),
            FOREIGN KEY(staff_profile_id) REFERENCES staff_profiles(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_classes_classroom ON staff_classes(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(marked_by) REFERENCES staff_profiles(id),
            UNIQUE(student_id, classroom_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id, classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_classroom_date ON attendance(classroom_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            maximum_marks REAL NOT NULL DEFAULT 100,
            entered_by TEXT NOT NULL,
            entered_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(entered_by) REFERENCES staff_profiles(id),
            UNIQUE(student_id, classroom_id, subject, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_classroom ON marks(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            important INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(created_by) REFERENCES staff_profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_classroom ON announcements(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcement_reads(
            announcement_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            read_at TEXT NOT NULL,
            PRIMARY KEY(announcement_id, student_id),
            FOREIGN KEY(announcement_id) REFERENCES announcements(id),
            FOREIGN KEY(student_id) REFERENCES student_profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcement_reads_student ON announcement_reads(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lectures(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            uploaded_by TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(uploaded_by) REFERENCES staff_profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lectures_classroom ON lectures(classroom_id)",
        [],
    )?;

    Ok(conn)
}
