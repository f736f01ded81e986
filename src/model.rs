use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown lesson type: {0}")]
    LessonType(String),
    #[error("attendance must be one of: present, absent, excused (got {0})")]
    Attendance(String),
    #[error("periodType must be one of: quarter, year, exam (got {0})")]
    PeriodType(String),
    #[error("dayOfWeek must be Monday..Saturday (got {0})")]
    DayOfWeek(String),
    #[error("recipient must look like class-<id> or student-<id> (got {0})")]
    Recipient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LessonType {
    Default,
    ClassWork,
    IndependentWork,
    ProjectWork,
    #[serde(rename = "SOR")]
    Sor,
    #[serde(rename = "SOCH")]
    Soch,
}

impl LessonType {
    pub const ALL: [LessonType; 6] = [
        LessonType::Default,
        LessonType::ClassWork,
        LessonType::IndependentWork,
        LessonType::ProjectWork,
        LessonType::Sor,
        LessonType::Soch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LessonType::Default => "Default",
            LessonType::ClassWork => "ClassWork",
            LessonType::IndependentWork => "IndependentWork",
            LessonType::ProjectWork => "ProjectWork",
            LessonType::Sor => "SOR",
            LessonType::Soch => "SOCH",
        }
    }

    pub fn is_summative(self) -> bool {
        matches!(self, LessonType::Sor | LessonType::Soch)
    }
}

impl FromStr for LessonType {
    type Err = ParseError;

    // Accepts the spaced display names ("Class Work") as well as the stored form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "default" => Ok(LessonType::Default),
            "classwork" => Ok(LessonType::ClassWork),
            "independentwork" => Ok(LessonType::IndependentWork),
            "projectwork" => Ok(LessonType::ProjectWork),
            "sor" => Ok(LessonType::Sor),
            "soch" => Ok(LessonType::Soch),
            _ => Err(ParseError::LessonType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attendance {
    Present,
    Absent,
    Excused,
}

impl Attendance {
    pub fn as_str(self) -> &'static str {
        match self {
            Attendance::Present => "present",
            Attendance::Absent => "absent",
            Attendance::Excused => "excused",
        }
    }
}

impl FromStr for Attendance {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Attendance::Present),
            "absent" => Ok(Attendance::Absent),
            "excused" => Ok(Attendance::Excused),
            _ => Err(ParseError::Attendance(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarter,
    Year,
    Exam,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Quarter => "quarter",
            PeriodType::Year => "year",
            PeriodType::Exam => "exam",
        }
    }
}

impl FromStr for PeriodType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quarter" => Ok(PeriodType::Quarter),
            "year" => Ok(PeriodType::Year),
            "exam" => Ok(PeriodType::Exam),
            _ => Err(ParseError::PeriodType(s.to_string())),
        }
    }
}

/// School days; lessons are never scheduled on Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
        }
    }

    pub fn index(self) -> i64 {
        self as i64 + 1
    }
}

impl FromStr for DayOfWeek {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Ok(DayOfWeek::Monday),
            "tuesday" | "tue" => Ok(DayOfWeek::Tuesday),
            "wednesday" | "wed" => Ok(DayOfWeek::Wednesday),
            "thursday" | "thu" => Ok(DayOfWeek::Thursday),
            "friday" | "fri" => Ok(DayOfWeek::Friday),
            "saturday" | "sat" => Ok(DayOfWeek::Saturday),
            _ => Err(ParseError::DayOfWeek(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Class(String),
    Student(String),
}

impl Recipient {
    pub fn kind(&self) -> &'static str {
        match self {
            Recipient::Class(_) => "class",
            Recipient::Student(_) => "student",
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            Recipient::Class(id) | Recipient::Student(id) => id,
        }
    }
}

impl FromStr for Recipient {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseError::Recipient(s.to_string());
        let (kind, id) = s.trim().split_once('-').ok_or_else(bad)?;
        if id.is_empty() {
            return Err(bad());
        }
        match kind {
            "class" => Ok(Recipient::Class(id.to_string())),
            "student" => Ok(Recipient::Student(id.to_string())),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind(), self.target_id())
    }
}
