use crate::db::{settings_get_json, settings_set_json};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::gradebook::{attendance_from_db, lesson_type_from_db};
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{
    format_date, get_optional_str, get_required_date, get_required_i64, get_required_str,
    get_required_text, require_class, row_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::model::PeriodType;
use crate::score::{score_quarter, ScorePolicy, ScoreRecord};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{info, warn};
use uuid::Uuid;

pub const SCORE_POLICY_KEY: &str = "results.scorePolicy";

static YEAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{4}$").expect("year name pattern"));

fn is_year_name(name: &str) -> bool {
    YEAR_NAME.is_match(name)
}

/// Stored override, or the default policy when none is stored or it no longer validates.
pub(crate) fn load_score_policy(conn: &Connection) -> Result<ScorePolicy, HandlerErr> {
    let stored = settings_get_json(conn, SCORE_POLICY_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    let Some(value) = stored else {
        return Ok(ScorePolicy::default());
    };
    match serde_json::from_value::<ScorePolicy>(value) {
        Ok(p) if p.validate().is_ok() => Ok(p),
        _ => {
            warn!(key = SCORE_POLICY_KEY, "stored score policy is invalid; using default");
            Ok(ScorePolicy::default())
        }
    }
}

#[derive(Debug, Clone)]
struct QuarterRow {
    id: String,
    name: String,
    start_date: String,
    end_date: String,
}

fn quarters_of_year(conn: &Connection, year_id: &str) -> Result<Vec<QuarterRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date
             FROM quarters
             WHERE academic_year_id = ?
             ORDER BY start_date, name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([year_id], |r| {
            Ok(QuarterRow {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn quarter_json(q: &QuarterRow) -> serde_json::Value {
    json!({
        "id": q.id,
        "name": q.name,
        "startDate": q.start_date,
        "endDate": q.end_date,
    })
}

fn years_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM academic_years ORDER BY name DESC")
        .map_err(HandlerErr::query)?;
    let years: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(years.len());
    for (id, name) in years {
        let quarters: Vec<serde_json::Value> =
            quarters_of_year(conn, &id)?.iter().map(quarter_json).collect();
        out.push(json!({ "id": id, "name": name, "quarters": quarters }));
    }
    Ok(json!({ "years": out }))
}

fn years_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_text(params, "name")?;
    if !is_year_name(&name) {
        return Err(HandlerErr::bad_params("name must look like 2024-2025")
            .with_details(json!({ "name": name })));
    }
    let year_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, name) VALUES(?, ?)",
        (&year_id, &name),
    )
    .map_err(|e| HandlerErr::insert("academic_years", e))?;
    info!(year_id = %year_id, name = %name, "academic year created");
    Ok(json!({ "yearId": year_id }))
}

fn years_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    if !row_exists(conn, "SELECT 1 FROM academic_years WHERE id = ?", &year_id)? {
        return Err(HandlerErr::not_found("academic year"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let quarter_grades = tx
        .execute(
            "DELETE FROM final_grades
             WHERE period_type = 'quarter'
               AND academic_period_id IN (SELECT id FROM quarters WHERE academic_year_id = ?)",
            [&year_id],
        )
        .map_err(|e| HandlerErr::delete("final_grades", e))?;
    let year_grades = tx
        .execute(
            "DELETE FROM final_grades
             WHERE period_type IN ('year', 'exam') AND academic_period_id = ?",
            [&year_id],
        )
        .map_err(|e| HandlerErr::delete("final_grades", e))?;
    tx.execute("DELETE FROM academic_years WHERE id = ?", [&year_id])
        .map_err(|e| HandlerErr::delete("academic_years", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    info!(
        year_id = %year_id,
        final_grades_removed = quarter_grades + year_grades,
        "academic year deleted"
    );
    Ok(json!({ "ok": true, "finalGradesRemoved": quarter_grades + year_grades }))
}

fn quarters_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "academicYearId")?;
    let name = get_required_text(params, "name")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    if start > end {
        return Err(HandlerErr::bad_params("startDate must not be after endDate").with_details(
            json!({ "startDate": format_date(start), "endDate": format_date(end) }),
        ));
    }
    if !row_exists(conn, "SELECT 1 FROM academic_years WHERE id = ?", &year_id)? {
        return Err(HandlerErr::not_found("academic year"));
    }

    let (start_s, end_s) = (format_date(start), format_date(end));
    let overlapping: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM quarters
             WHERE academic_year_id = ? AND start_date <= ? AND end_date >= ?
             LIMIT 1",
            (&year_id, &end_s, &start_s),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if let Some((other_id, other_name)) = overlapping {
        return Err(
            HandlerErr::new("conflict", "quarter overlaps another quarter of this year")
                .with_details(json!({ "quarterId": other_id, "name": other_name })),
        );
    }

    let quarter_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO quarters(id, name, academic_year_id, start_date, end_date)
         VALUES(?, ?, ?, ?, ?)",
        (&quarter_id, &name, &year_id, &start_s, &end_s),
    )
    .map_err(|e| HandlerErr::insert("quarters", e))?;
    info!(quarter_id = %quarter_id, year_id = %year_id, start = %start_s, end = %end_s, "quarter created");
    Ok(json!({ "quarterId": quarter_id }))
}

fn quarters_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let quarter_id = get_required_str(params, "quarterId")?;
    if !row_exists(conn, "SELECT 1 FROM quarters WHERE id = ?", &quarter_id)? {
        return Err(HandlerErr::not_found("quarter"));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "DELETE FROM final_grades WHERE period_type = 'quarter' AND academic_period_id = ?",
        [&quarter_id],
    )
    .map_err(|e| HandlerErr::delete("final_grades", e))?;
    tx.execute("DELETE FROM quarters WHERE id = ?", [&quarter_id])
        .map_err(|e| HandlerErr::delete("quarters", e))?;
    tx.commit().map_err(HandlerErr::commit)?;
    info!(quarter_id = %quarter_id, "quarter deleted");
    Ok(json!({ "ok": true }))
}

fn load_score_records(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    quarter: &QuarterRow,
) -> Result<HashMap<String, Vec<ScoreRecord>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, g.grade, g.attendance, l.lesson_type, l.max_points
             FROM grades g
             JOIN lessons l ON l.id = g.lesson_id
             JOIN students s ON s.id = g.student_id
             WHERE s.class_id = ?
               AND l.subject_id = ?
               AND l.date >= ? AND l.date <= ?",
        )
        .map_err(HandlerErr::query)?;
    let mut by_student: HashMap<String, Vec<ScoreRecord>> = HashMap::new();
    let mut rows = stmt
        .query((class_id, subject_id, &quarter.start_date, &quarter.end_date))
        .map_err(HandlerErr::query)?;
    while let Some(row) = rows.next().map_err(HandlerErr::query)? {
        let student_id: String = row.get(0).map_err(HandlerErr::query)?;
        let attendance: String = row.get(2).map_err(HandlerErr::query)?;
        let lesson_type: String = row.get(3).map_err(HandlerErr::query)?;
        by_student.entry(student_id).or_default().push(ScoreRecord {
            grade: row.get(1).map_err(HandlerErr::query)?,
            attendance: attendance_from_db(&attendance),
            lesson_type: lesson_type_from_db(&lesson_type),
            max_points: row.get(4).map_err(HandlerErr::query)?,
        });
    }
    Ok(by_student)
}

/// (student, period type, period id) -> grade for one class and subject.
fn load_final_grades(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<HashMap<(String, String, String), i64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT fg.student_id, fg.period_type, fg.academic_period_id, fg.grade
             FROM final_grades fg
             JOIN students s ON s.id = fg.student_id
             WHERE s.class_id = ? AND fg.subject_id = ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((class_id, subject_id), |r| {
            Ok(((r.get(0)?, r.get(1)?, r.get(2)?), r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn results_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let requested_quarter = get_optional_str(params, "quarterId")?;

    let year_name: String = conn
        .query_row(
            "SELECT name FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("academic year"))?;
    let class_name = require_class(conn, &class_id)?;
    let subject_name: String = conn
        .query_row(
            "SELECT name FROM subjects WHERE id = ? AND class_id = ?",
            (&subject_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("subject"))?;

    let quarters = quarters_of_year(conn, &year_id)?;
    let selected = match requested_quarter {
        Some(id) => Some(
            quarters
                .iter()
                .find(|q| q.id == id)
                .cloned()
                .ok_or_else(|| HandlerErr::not_found("quarter"))?,
        ),
        None => quarters.first().cloned(),
    };

    let policy = load_score_policy(conn)?;
    let mut records = match selected.as_ref() {
        Some(q) => load_score_records(conn, &class_id, &subject_id, q)?,
        None => HashMap::new(),
    };
    let final_grades = load_final_grades(conn, &class_id, &subject_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name
             FROM students
             WHERE class_id = ?
             ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let students: Vec<(String, String, String)> = stmt
        .query_map([&class_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let lookup = |student_id: &str, period: PeriodType, period_id: &str| {
        final_grades
            .get(&(
                student_id.to_string(),
                period.as_str().to_string(),
                period_id.to_string(),
            ))
            .copied()
    };

    let mut rows = Vec::with_capacity(students.len());
    for (student_id, first_name, last_name) in students {
        let score = selected.as_ref().map(|_| {
            score_quarter(records.remove(&student_id).unwrap_or_default(), &policy)
        });
        let quarter_grades: Vec<serde_json::Value> = quarters
            .iter()
            .map(|q| {
                json!({
                    "quarterId": q.id,
                    "grade": lookup(&student_id, PeriodType::Quarter, &q.id),
                })
            })
            .collect();
        rows.push(json!({
            "studentId": student_id,
            "firstName": first_name,
            "lastName": last_name,
            "score": score,
            "finalGrades": {
                "quarters": quarter_grades,
                "year": lookup(&student_id, PeriodType::Year, &year_id),
                "exam": lookup(&student_id, PeriodType::Exam, &year_id),
            },
        }));
    }

    Ok(json!({
        "year": { "id": year_id, "name": year_name },
        "class": { "id": class_id, "name": class_name },
        "subject": { "id": subject_id, "name": subject_name },
        "quarters": quarters.iter().map(quarter_json).collect::<Vec<_>>(),
        "selectedQuarterId": selected.as_ref().map(|q| q.id.clone()),
        "policy": policy,
        "students": rows,
    }))
}

struct FinalGradeKey {
    student_id: String,
    subject_id: String,
    period_id: String,
    period_type: PeriodType,
}

fn final_grade_key(params: &serde_json::Value) -> Result<FinalGradeKey, HandlerErr> {
    Ok(FinalGradeKey {
        student_id: get_required_str(params, "studentId")?,
        subject_id: get_required_str(params, "subjectId")?,
        period_id: get_required_str(params, "academicPeriodId")?,
        period_type: get_required_str(params, "periodType")?.parse()?,
    })
}

fn final_grades_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = final_grade_key(params)?;
    let grade = get_required_i64(params, "grade")?;
    if !(2..=5).contains(&grade) {
        return Err(HandlerErr::bad_params("grade must be between 2 and 5")
            .with_details(json!({ "grade": grade })));
    }
    let class_of = |sql: &str, id: &str, what: &str| -> Result<String, HandlerErr> {
        conn.query_row(sql, [id], |r| r.get::<_, String>(0))
            .optional()
            .map_err(HandlerErr::query)?
            .ok_or_else(|| HandlerErr::not_found(what))
    };
    let student_class = class_of(
        "SELECT class_id FROM students WHERE id = ?",
        &key.student_id,
        "student",
    )?;
    let subject_class = class_of(
        "SELECT class_id FROM subjects WHERE id = ?",
        &key.subject_id,
        "subject",
    )?;
    if student_class != subject_class {
        return Err(
            HandlerErr::bad_params("student and subject belong to different classes").with_details(
                json!({ "studentClassId": student_class, "subjectClassId": subject_class }),
            ),
        );
    }
    let period_sql = match key.period_type {
        PeriodType::Quarter => "SELECT 1 FROM quarters WHERE id = ?",
        PeriodType::Year | PeriodType::Exam => "SELECT 1 FROM academic_years WHERE id = ?",
    };
    if !row_exists(conn, period_sql, &key.period_id)? {
        return Err(HandlerErr::not_found("academic period"));
    }

    conn.execute(
        "INSERT INTO final_grades(id, student_id, subject_id, academic_period_id, period_type, grade)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, academic_period_id, period_type)
         DO UPDATE SET grade = excluded.grade",
        (
            Uuid::new_v4().to_string(),
            &key.student_id,
            &key.subject_id,
            &key.period_id,
            key.period_type.as_str(),
            grade,
        ),
    )
    .map_err(|e| HandlerErr::insert("final_grades", e))?;

    let final_grade_id: String = conn
        .query_row(
            "SELECT id FROM final_grades
             WHERE student_id = ? AND subject_id = ? AND academic_period_id = ? AND period_type = ?",
            (
                &key.student_id,
                &key.subject_id,
                &key.period_id,
                key.period_type.as_str(),
            ),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    info!(
        student_id = %key.student_id,
        subject_id = %key.subject_id,
        period_type = key.period_type.as_str(),
        grade,
        "final grade set"
    );
    Ok(json!({ "finalGradeId": final_grade_id, "grade": grade }))
}

fn final_grades_clear(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = final_grade_key(params)?;
    let removed = conn
        .execute(
            "DELETE FROM final_grades
             WHERE student_id = ? AND subject_id = ? AND academic_period_id = ? AND period_type = ?",
            (
                &key.student_id,
                &key.subject_id,
                &key.period_id,
                key.period_type.as_str(),
            ),
        )
        .map_err(|e| HandlerErr::delete("final_grades", e))?;
    Ok(json!({ "ok": true, "removed": removed > 0 }))
}

fn settings_get_score_policy(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let policy = load_score_policy(conn)?;
    Ok(json!({ "policy": policy, "defaults": ScorePolicy::default() }))
}

fn settings_set_score_policy(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = params
        .get("policy")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing policy"))?;
    let policy: ScorePolicy = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid policy: {e}")))?;
    policy.validate().map_err(HandlerErr::bad_params)?;

    let value = serde_json::to_value(policy)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    settings_set_json(conn, SCORE_POLICY_KEY, &value)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    info!(
        formative = policy.formative_weight,
        sor = policy.sor_weight,
        soch = policy.soch_weight,
        "score policy updated"
    );
    Ok(json!({ "policy": policy }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(with_db(state, req, years_list)),
        "years.create" => Some(with_db(state, req, years_create)),
        "years.delete" => Some(with_db(state, req, years_delete)),
        "quarters.create" => Some(with_db(state, req, quarters_create)),
        "quarters.delete" => Some(with_db(state, req, quarters_delete)),
        "results.open" => Some(with_db(state, req, results_open)),
        "finalGrades.set" => Some(with_db(state, req, final_grades_set)),
        "finalGrades.clear" => Some(with_db(state, req, final_grades_clear)),
        "settings.getScorePolicy" => Some(with_db(state, req, settings_get_score_policy)),
        "settings.setScorePolicy" => Some(with_db(state, req, settings_set_score_policy)),
        _ => None,
    }
}
