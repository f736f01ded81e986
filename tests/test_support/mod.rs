#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub const USERNAME: &str = "teacher";
pub const PASSWORD: &str = "gradebook";

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOK_WORKSPACE")
        .env_remove("GRADEBOOK_USERNAME")
        .env_remove("GRADEBOOK_PASSWORD")
        .env_remove("GRADEBOOK_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Returns the error code of a request expected to fail.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    /// Logs in and opens a workspace in `dir`.
    pub fn open(&mut self, dir: &std::path::Path) {
        self.request_ok(
            "auth.login",
            json!({ "username": USERNAME, "password": PASSWORD }),
        );
        self.request_ok(
            "workspace.select",
            json!({ "path": dir.to_string_lossy() }),
        );
    }
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// Class with the given students and one subject. Returns (classId, subjectId, studentIds).
pub fn seed_class(
    sidecar: &mut Sidecar,
    class_name: &str,
    students: &[(&str, &str)],
    subject: &str,
) -> (String, String, Vec<String>) {
    let class = sidecar.request_ok("classes.create", json!({ "name": class_name }));
    let class_id = str_field(&class, "classId");
    let mut student_ids = Vec::new();
    for (first, last) in students {
        let s = sidecar.request_ok(
            "students.create",
            json!({ "classId": class_id, "firstName": first, "lastName": last }),
        );
        student_ids.push(str_field(&s, "studentId"));
    }
    let sub = sidecar.request_ok(
        "subjects.create",
        json!({ "classId": class_id, "name": subject }),
    );
    (class_id, str_field(&sub, "subjectId"), student_ids)
}
