use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    // Cascades below only fire with enforcement on, and it is per-connection.
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            UNIQUE(name, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_items(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            day_index INTEGER NOT NULL,
            lesson_number INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_items_class ON schedule_items(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            topic TEXT NOT NULL DEFAULT 'No topic',
            homework TEXT NOT NULL DEFAULT '',
            lesson_type TEXT NOT NULL DEFAULT 'Default',
            max_points INTEGER,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_subject_date ON lessons(subject_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            grade INTEGER,
            attendance TEXT NOT NULL DEFAULT 'present',
            comment TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
            UNIQUE(student_id, lesson_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_lesson ON grades(lesson_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quarters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quarters_year ON quarters(academic_year_id)",
        [],
    )?;

    // academic_period_id points at either quarters or academic_years depending
    // on period_type, so it carries no foreign key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            academic_period_id TEXT NOT NULL,
            period_type TEXT NOT NULL CHECK(period_type IN ('quarter', 'year', 'exam')),
            grade INTEGER NOT NULL CHECK(grade BETWEEN 2 AND 5),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(student_id, subject_id, academic_period_id, period_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_final_grades_period ON final_grades(academic_period_id, period_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            recipient_name TEXT NOT NULL,
            recipient_type TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {key} is not valid JSON"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleting_a_class_cascades_to_grades() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");
        conn.execute_batch(
            "INSERT INTO classes(id, name) VALUES('c1', '7A');
             INSERT INTO students(id, class_id, first_name, last_name) VALUES('s1', 'c1', 'Ann', 'Lee');
             INSERT INTO subjects(id, class_id, name) VALUES('sub1', 'c1', 'Algebra');
             INSERT INTO lessons(id, subject_id, date) VALUES('l1', 'sub1', '2024-09-02');
             INSERT INTO grades(id, student_id, lesson_id, grade) VALUES('g1', 's1', 'l1', 9);
             INSERT INTO final_grades(id, student_id, subject_id, academic_period_id, period_type, grade)
               VALUES('f1', 's1', 'sub1', 'q1', 'quarter', 5);",
        )
        .expect("seed");

        conn.execute("DELETE FROM classes WHERE id = 'c1'", [])
            .expect("delete class");

        for table in ["students", "subjects", "lessons", "grades", "final_grades"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .expect("count");
            assert_eq!(n, 0, "{table} should be empty");
        }
    }

    #[test]
    fn reopening_keeps_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let conn = open_db(dir.path()).expect("open db");
            settings_set_json(&conn, "k", &serde_json::json!({ "a": 1 })).expect("set");
            settings_set_json(&conn, "k", &serde_json::json!({ "a": 2 })).expect("overwrite");
        }
        let conn = open_db(dir.path()).expect("reopen db");
        let v = settings_get_json(&conn, "k").expect("get");
        assert_eq!(v, Some(serde_json::json!({ "a": 2 })));
        assert_eq!(settings_get_json(&conn, "missing").expect("get"), None);
    }
}
