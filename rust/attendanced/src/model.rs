use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Calendar years a wire date may fall in.
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Tardy,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Tardy => "tardy",
            Self::Excused => "excused",
        }
    }

    /// Accepts the wire words and the single-letter register codes
    /// (`P`, `A`, `T`/`L`, `E`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(Self::Present),
            "absent" | "a" => Some(Self::Absent),
            "tardy" | "late" | "t" | "l" => Some(Self::Tardy),
            "excused" | "e" => Some(Self::Excused),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AttendanceRecord {
    pub fn new(student_id: impl Into<String>, date: NaiveDate, status: AttendanceStatus) -> Self {
        Self {
            student_id: student_id.into(),
            date,
            status,
            note: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("student name must not be empty")]
    EmptyName,
    #[error("invalid email address: {0}")]
    BadEmail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub active: bool,
}

impl NewStudent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            active: true,
        }
    }

    /// Trims fields and checks them; returns the normalized copy.
    pub fn normalized(&self) -> Result<Self, ValidationError> {
        Ok(Self {
            name: normalize_name(&self.name)?,
            email: normalize_email(&self.email)?,
            active: self.active,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
}

impl StudentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.active.is_none()
    }

    pub fn apply(&self, student: &Student) -> Result<Student, ValidationError> {
        let mut next = student.clone();
        if let Some(name) = &self.name {
            next.name = normalize_name(name)?;
        }
        if let Some(email) = &self.email {
            next.email = normalize_email(email)?;
        }
        if let Some(active) = self.active {
            next.active = active;
        }
        Ok(next)
    }
}

fn normalize_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(name.to_string())
}

fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim();
    if email.is_empty() {
        return Ok(String::new());
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::BadEmail(email.to_string()));
    };
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return Err(ValidationError::BadEmail(email.to_string()));
    }
    Ok(email.to_string())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .ok()
        .filter(|d| (MIN_YEAR..=MAX_YEAR).contains(&d.year()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_words_and_codes() {
        assert_eq!(AttendanceStatus::parse("Present"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse(" a "), Some(AttendanceStatus::Absent));
        assert_eq!(AttendanceStatus::parse("L"), Some(AttendanceStatus::Tardy));
        assert_eq!(AttendanceStatus::parse("late"), Some(AttendanceStatus::Tardy));
        assert_eq!(AttendanceStatus::parse("e"), Some(AttendanceStatus::Excused));
        assert_eq!(AttendanceStatus::parse("x"), None);
        assert_eq!(AttendanceStatus::parse(""), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let v = serde_json::to_value(AttendanceStatus::Excused).expect("serialize");
        assert_eq!(v, serde_json::json!("excused"));
    }

    #[test]
    fn new_student_normalizes_and_validates() {
        let s = NewStudent::new("  Ada Lovelace ", " ada@example.org ")
            .normalized()
            .expect("valid");
        assert_eq!(s.name, "Ada Lovelace");
        assert_eq!(s.email, "ada@example.org");

        assert_eq!(
            NewStudent::new("   ", "").normalized(),
            Err(ValidationError::EmptyName)
        );
        assert!(matches!(
            NewStudent::new("Bob", "bob@@x").normalized(),
            Err(ValidationError::BadEmail(_))
        ));
        assert!(matches!(
            NewStudent::new("Bob", "@x.org").normalized(),
            Err(ValidationError::BadEmail(_))
        ));
        assert!(NewStudent::new("Bob", "").normalized().is_ok());
    }

    #[test]
    fn patch_applies_only_given_fields() {
        let student = Student {
            id: "s1".into(),
            name: "Old".into(),
            email: "old@x.org".into(),
            active: true,
            sort_order: 0,
        };
        let patch = StudentPatch {
            active: Some(false),
            ..Default::default()
        };
        let next = patch.apply(&student).expect("apply");
        assert_eq!(next.name, "Old");
        assert!(!next.active);
        assert!(StudentPatch::default().is_empty());
    }

    #[test]
    fn dates_round_trip_through_wire_format() {
        let d = parse_date("2024-02-29").expect("leap day");
        assert_eq!(format_date(d), "2024-02-29");
        assert!(parse_date("2023-02-29").is_none());
        assert!(parse_date("02/03/2024").is_none());
    }

    #[test]
    fn dates_outside_supported_years_are_rejected() {
        assert!(parse_date("1900-01-01").is_some());
        assert!(parse_date("9999-12-31").is_some());
        assert!(parse_date("1899-12-31").is_none());
        assert!(parse_date("+262142-12-31").is_none());
        assert!(parse_date("-0001-01-01").is_none());
    }
}
