use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EXPORT_FORMAT_V1: &str = "gradebook-export-v1";
pub const JSON_FILE_NAME: &str = "gradebook_export.json";
pub const CSV_FILE_NAME: &str = "gradebook_export.csv";
const MANIFEST_ENTRY: &str = "manifest.json";
const CSV_HEADER: [&str; 8] = [
    "Student",
    "Class",
    "Subject",
    "Date",
    "Topic",
    "Grade",
    "Attendance",
    "Comment",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Json => JSON_FILE_NAME,
            ExportFormat::Csv => CSV_FILE_NAME,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub class_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub id: String,
    pub class_id: String,
    pub day_of_week: String,
    pub lesson_number: i64,
    pub subject_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRow {
    pub id: String,
    pub subject_id: String,
    pub date: String,
    pub topic: String,
    pub homework: String,
    pub lesson_type: String,
    pub max_points: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: String,
    pub student_id: String,
    pub lesson_id: String,
    pub grade: Option<i64>,
    pub attendance: String,
    pub comment: Option<String>,
}

/// Everything a teacher enters, in the shape written to `gradebook_export.json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportData {
    pub classes: Vec<ClassRow>,
    pub students: Vec<StudentRow>,
    pub subjects: Vec<SubjectRow>,
    pub schedule: Vec<ScheduleRow>,
    pub lessons: Vec<LessonRow>,
    pub grades: Vec<GradeRow>,
}

#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub format: String,
    pub entry_count: usize,
    pub grade_rows: usize,
}

fn collect<T, F>(conn: &Connection, sql: &str, table: &str, map: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("failed to read {table}"))?;
    let rows = stmt
        .query_map([], map)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .with_context(|| format!("failed to read {table}"))?;
    Ok(rows)
}

pub fn load_export_data(conn: &Connection) -> anyhow::Result<ExportData> {
    let classes = collect(conn, "SELECT id, name FROM classes ORDER BY name", "classes", |r| {
        Ok(ClassRow {
            id: r.get(0)?,
            name: r.get(1)?,
        })
    })?;
    let students = collect(
        conn,
        "SELECT id, class_id, first_name, last_name FROM students ORDER BY last_name, first_name",
        "students",
        |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
            })
        },
    )?;
    let subjects = collect(
        conn,
        "SELECT id, class_id, name FROM subjects ORDER BY name",
        "subjects",
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )?;
    let schedule = collect(
        conn,
        "SELECT id, class_id, day_of_week, lesson_number, subject_id
         FROM schedule_items
         ORDER BY class_id, day_index, lesson_number",
        "schedule_items",
        |r| {
            Ok(ScheduleRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                day_of_week: r.get(2)?,
                lesson_number: r.get(3)?,
                subject_id: r.get(4)?,
            })
        },
    )?;
    let lessons = collect(
        conn,
        "SELECT id, subject_id, date, topic, homework, lesson_type, max_points
         FROM lessons
         ORDER BY date, rowid",
        "lessons",
        |r| {
            Ok(LessonRow {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                date: r.get(2)?,
                topic: r.get(3)?,
                homework: r.get(4)?,
                lesson_type: r.get(5)?,
                max_points: r.get(6)?,
            })
        },
    )?;
    let grades = collect(
        conn,
        "SELECT g.id, g.student_id, g.lesson_id, g.grade, g.attendance, g.comment
         FROM grades g
         JOIN lessons l ON l.id = g.lesson_id
         ORDER BY l.date, l.rowid, g.student_id",
        "grades",
        |r| {
            Ok(GradeRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                lesson_id: r.get(2)?,
                grade: r.get(3)?,
                attendance: r.get(4)?,
                comment: r.get(5)?,
            })
        },
    )?;

    Ok(ExportData {
        classes,
        students,
        subjects,
        schedule,
        lessons,
        grades,
    })
}

pub fn render_json(data: &ExportData) -> anyhow::Result<String> {
    serde_json::to_string_pretty(data).context("failed to serialize export")
}

/// One row per grade cell. Text fields are quoted when they contain separators or quotes.
pub fn render_csv(data: &ExportData) -> anyhow::Result<String> {
    let students: HashMap<&str, &StudentRow> =
        data.students.iter().map(|s| (s.id.as_str(), s)).collect();
    let lessons: HashMap<&str, &LessonRow> =
        data.lessons.iter().map(|l| (l.id.as_str(), l)).collect();
    let subjects: HashMap<&str, &str> = data
        .subjects
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();
    let classes: HashMap<&str, &str> = data
        .classes
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .context("failed to write csv header")?;

    for grade in &data.grades {
        let student = students.get(grade.student_id.as_str());
        let lesson = lessons.get(grade.lesson_id.as_str());
        let student_name = student
            .map(|s| format!("{} {}", s.last_name, s.first_name))
            .unwrap_or_default();
        let class_name = student
            .and_then(|s| classes.get(s.class_id.as_str()).copied())
            .unwrap_or("");
        let subject_name = lesson
            .and_then(|l| subjects.get(l.subject_id.as_str()).copied())
            .unwrap_or("");
        let grade_text = grade.grade.map(|g| g.to_string()).unwrap_or_default();
        writer
            .write_record([
                student_name.as_str(),
                class_name,
                subject_name,
                lesson.map(|l| l.date.as_str()).unwrap_or(""),
                lesson.map(|l| l.topic.as_str()).unwrap_or(""),
                grade_text.as_str(),
                grade.attendance.as_str(),
                grade.comment.as_deref().unwrap_or(""),
            ])
            .with_context(|| format!("failed to write csv row for grade {}", grade.id))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv: {}", e.error()))?;
    String::from_utf8(bytes).context("csv export is not valid UTF-8")
}

pub fn export_data(conn: &Connection, format: ExportFormat) -> anyhow::Result<ExportFile> {
    let data = load_export_data(conn)?;
    let text = match format {
        ExportFormat::Json => render_json(&data)?,
        ExportFormat::Csv => render_csv(&data)?,
    };
    Ok(ExportFile {
        file_name: format.file_name(),
        mime_type: format.mime_type(),
        data: text,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes both renderings plus a manifest carrying their SHA-256 digests.
pub fn write_export_archive(conn: &Connection, out_path: &Path) -> anyhow::Result<ArchiveSummary> {
    let data = load_export_data(conn)?;
    let entries = [
        (JSON_FILE_NAME, render_json(&data)?),
        (CSV_FILE_NAME, render_csv(&data)?),
    ];

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut digests = Vec::with_capacity(entries.len());
    for (name, body) in &entries {
        zip.start_file(*name, opts)
            .with_context(|| format!("failed to start entry {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write entry {name}"))?;
        digests.push(json!({
            "name": name,
            "bytes": body.len(),
            "sha256": sha256_hex(body.as_bytes()),
        }));
    }

    let manifest = json!({
        "format": EXPORT_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "entries": digests,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize export archive")?;

    Ok(ArchiveSummary {
        format: EXPORT_FORMAT_V1.to_string(),
        entry_count: entries.len() + 1,
        grade_rows: data.grades.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample() -> ExportData {
        ExportData {
            classes: vec![ClassRow {
                id: "c1".into(),
                name: "7A".into(),
            }],
            students: vec![StudentRow {
                id: "s1".into(),
                class_id: "c1".into(),
                first_name: "Ann".into(),
                last_name: "Lee".into(),
            }],
            subjects: vec![SubjectRow {
                id: "sub1".into(),
                class_id: "c1".into(),
                name: "Algebra".into(),
            }],
            schedule: Vec::new(),
            lessons: vec![LessonRow {
                id: "l1".into(),
                subject_id: "sub1".into(),
                date: "2024-09-02".into(),
                topic: "Fractions, part \"one\"".into(),
                homework: String::new(),
                lesson_type: "Default".into(),
                max_points: None,
            }],
            grades: vec![
                GradeRow {
                    id: "g1".into(),
                    student_id: "s1".into(),
                    lesson_id: "l1".into(),
                    grade: Some(9),
                    attendance: "present".into(),
                    comment: Some("good, careful".into()),
                },
                GradeRow {
                    id: "g2".into(),
                    student_id: "s1".into(),
                    lesson_id: "l1".into(),
                    grade: None,
                    attendance: "absent".into(),
                    comment: None,
                },
            ],
        }
    }

    #[test]
    fn csv_quotes_commas_and_quotes() {
        let text = render_csv(&sample()).expect("csv");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Student,Class,Subject,Date,Topic,Grade,Attendance,Comment");
        assert_eq!(
            lines[1],
            "Lee Ann,7A,Algebra,2024-09-02,\"Fractions, part \"\"one\"\"\",9,present,\"good, careful\""
        );
        assert_eq!(
            lines[2],
            "Lee Ann,7A,Algebra,2024-09-02,\"Fractions, part \"\"one\"\"\",,absent,"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn json_export_uses_camel_case_sections() {
        let text = render_json(&sample()).expect("json");
        let v: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(v["students"][0]["firstName"], "Ann");
        assert_eq!(v["lessons"][0]["lessonType"], "Default");
        assert!(v["grades"][1]["grade"].is_null());
        assert!(v["schedule"].as_array().map(|a| a.is_empty()).unwrap_or(false));
    }

    #[test]
    fn format_names_and_mime_types() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("xml"), None);
        assert_eq!(ExportFormat::Json.file_name(), "gradebook_export.json");
        assert_eq!(ExportFormat::Csv.mime_type(), "text/csv");
    }

    #[test]
    fn archive_manifest_digests_match_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = crate::db::open_db(dir.path()).expect("open db");
        conn.execute_batch(
            "INSERT INTO classes(id, name) VALUES('c1', '7A');
             INSERT INTO students(id, class_id, first_name, last_name) VALUES('s1', 'c1', 'Ann', 'Lee');
             INSERT INTO subjects(id, class_id, name) VALUES('sub1', 'c1', 'Algebra');
             INSERT INTO lessons(id, subject_id, date) VALUES('l1', 'sub1', '2024-09-02');
             INSERT INTO grades(id, student_id, lesson_id, grade) VALUES('g1', 's1', 'l1', 8);",
        )
        .expect("seed");

        let out = dir.path().join("out").join("export.zip");
        let summary = write_export_archive(&conn, &out).expect("archive");
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.grade_rows, 1);

        let mut archive = zip::ZipArchive::new(File::open(&out).expect("open zip")).expect("zip");
        let mut manifest_text = String::new();
        archive
            .by_name("manifest.json")
            .expect("manifest")
            .read_to_string(&mut manifest_text)
            .expect("read manifest");
        let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("json");
        assert_eq!(manifest["format"], EXPORT_FORMAT_V1);

        let mut csv_text = String::new();
        archive
            .by_name(CSV_FILE_NAME)
            .expect("csv entry")
            .read_to_string(&mut csv_text)
            .expect("read csv");
        let csv_entry = manifest["entries"]
            .as_array()
            .and_then(|a| a.iter().find(|e| e["name"] == CSV_FILE_NAME))
            .expect("csv digest");
        assert_eq!(csv_entry["sha256"], sha256_hex(csv_text.as_bytes()));
        assert!(csv_text.contains("Lee Ann,7A,Algebra,2024-09-02,No topic,8,present,"));
    }
}
