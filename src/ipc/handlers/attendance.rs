use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::gradebook::attendance_from_db;
use crate::ipc::handlers::with_db;
use crate::ipc::helpers::{format_date, get_optional_date, get_required_str, require_class};
use crate::ipc::types::{AppState, Request};
use crate::model::Attendance;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

/// Below this share of lessons attended a student is flagged.
const LOW_ATTENDANCE_PERCENT: u32 = 80;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AttendanceTally {
    present: u32,
    absent: u32,
    excused: u32,
}

impl AttendanceTally {
    fn add(&mut self, a: Attendance) {
        match a {
            Attendance::Present => self.present += 1,
            Attendance::Absent => self.absent += 1,
            Attendance::Excused => self.excused += 1,
        }
    }

    fn total(&self) -> u32 {
        self.present + self.absent + self.excused
    }

    fn present_percent(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        ((self.present as f64 / total as f64) * 100.0).round() as u32
    }
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let from = get_optional_date(params, "from")?;
    let to = get_optional_date(params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    require_class(conn, &class_id)?;

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

    // Open-ended bounds compare against sentinels that sort outside any ISO date.
    let from_s = from.map(format_date).unwrap_or_else(|| "0000-01-01".to_string());
    let to_s = to.map(format_date).unwrap_or_else(|| "9999-12-31".to_string());
    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, g.attendance
             FROM grades g
             JOIN lessons l ON l.id = g.lesson_id
             JOIN subjects sub ON sub.id = l.subject_id
             WHERE sub.class_id = ? AND l.date >= ? AND l.date <= ?",
        )
        .map_err(HandlerErr::query)?;
    let mut tallies: HashMap<String, AttendanceTally> = HashMap::new();
    {
        let mut cells = stmt
            .query((&class_id, &from_s, &to_s))
            .map_err(HandlerErr::query)?;
        while let Some(row) = cells.next().map_err(HandlerErr::query)? {
            let student_id: String = row.get(0).map_err(HandlerErr::query)?;
            let attendance: String = row.get(1).map_err(HandlerErr::query)?;
            tallies
                .entry(student_id)
                .or_default()
                .add(attendance_from_db(&attendance));
        }
    }

    let rows: Vec<serde_json::Value> = students
        .into_iter()
        .map(|(id, first_name, last_name)| {
            let tally = tallies.remove(&id).unwrap_or_default();
            let percent = tally.present_percent();
            json!({
                "studentId": id,
                "firstName": first_name,
                "lastName": last_name,
                "present": tally.present,
                "absent": tally.absent,
                "excused": tally.excused,
                "total": tally.total(),
                "presentPercent": percent,
                "lowAttendance": tally.total() > 0 && percent < LOW_ATTENDANCE_PERCENT,
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "from": from.map(format_date),
        "to": to.map(format_date),
        "students": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.summary" => Some(with_db(state, req, attendance_summary)),
        _ => None,
    }
}
