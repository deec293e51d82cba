//! Attendance data access.
//!
//! Handlers and reports talk to [`AttendanceRepository`] only; the SQLite
//! implementation keeps all SQL in this file. Writes validate student input
//! before touching storage, and attendance writes require the student to
//! exist.

use crate::calc::{AttendanceLedger, DateRange};
use crate::model::{
    format_date, parse_date, AttendanceRecord, AttendanceStatus, NewStudent, Student,
    StudentPatch, ValidationError,
};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl RepoError {
    /// Wire error code for IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StudentNotFound(_) => "not_found",
            Self::Validation(_) => "bad_params",
            Self::Db(_) | Self::InvalidData(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub student_id: Option<String>,
    pub range: DateRange,
}

pub trait AttendanceRepository {
    fn list_students(&self, include_inactive: bool) -> RepoResult<Vec<Student>>;
    fn get_student(&self, id: &str) -> RepoResult<Option<Student>>;
    fn create_student(&self, new: &NewStudent) -> RepoResult<Student>;
    fn update_student(&self, id: &str, patch: &StudentPatch) -> RepoResult<Student>;
    /// Removes the student together with their attendance records.
    fn delete_student(&self, id: &str) -> RepoResult<()>;

    /// Upsert keyed by `(student_id, date)`. Returns the status it replaced.
    fn record_attendance(&self, record: &AttendanceRecord)
        -> RepoResult<Option<AttendanceStatus>>;
    fn delete_record(&self, student_id: &str, date: NaiveDate) -> RepoResult<bool>;
    /// Ordered by student then date.
    fn list_records(&self, query: &RecordQuery) -> RepoResult<Vec<AttendanceRecord>>;

    fn load_ledger(&self, range: &DateRange) -> RepoResult<AttendanceLedger> {
        let records = self.list_records(&RecordQuery {
            student_id: None,
            range: *range,
        })?;
        Ok(AttendanceLedger::from_records(records))
    }
}

const STUDENT_SELECT_SQL: &str = "SELECT id, name, email, active, sort_order FROM students";

pub struct SqliteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn require_student(&self, id: &str) -> RepoResult<()> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some();
        if !exists {
            return Err(RepoError::StudentNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn parse_student_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        sort_order: row.get(4)?,
    })
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl AttendanceRepository for SqliteRepository<'_> {
    fn list_students(&self, include_inactive: bool) -> RepoResult<Vec<Student>> {
        let sql = if include_inactive {
            format!("{STUDENT_SELECT_SQL} ORDER BY sort_order, id")
        } else {
            format!("{STUDENT_SELECT_SQL} WHERE active = 1 ORDER BY sort_order, id")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], parse_student_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_student(&self, id: &str) -> RepoResult<Option<Student>> {
        let student = self
            .conn
            .query_row(
                &format!("{STUDENT_SELECT_SQL} WHERE id = ?"),
                [id],
                parse_student_row,
            )
            .optional()?;
        Ok(student)
    }

    fn create_student(&self, new: &NewStudent) -> RepoResult<Student> {
        let new = new.normalized()?;
        let id = Uuid::new_v4().to_string();
        let sort_order: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students",
            [],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO students(id, name, email, active, sort_order, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                new.name,
                new.email,
                new.active as i64,
                sort_order,
                now_stamp()
            ],
        )?;
        Ok(Student {
            id,
            name: new.name,
            email: new.email,
            active: new.active,
            sort_order,
        })
    }

    fn update_student(&self, id: &str, patch: &StudentPatch) -> RepoResult<Student> {
        let Some(current) = self.get_student(id)? else {
            return Err(RepoError::StudentNotFound(id.to_string()));
        };
        let next = patch.apply(&current)?;
        self.conn.execute(
            "UPDATE students SET name = ?1, email = ?2, active = ?3, updated_at = ?4
             WHERE id = ?5",
            params![next.name, next.email, next.active as i64, now_stamp(), id],
        )?;
        Ok(next)
    }

    fn delete_student(&self, id: &str) -> RepoResult<()> {
        let changed = self.conn.execute("DELETE FROM students WHERE id = ?", [id])?;
        if changed == 0 {
            return Err(RepoError::StudentNotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> RepoResult<Option<AttendanceStatus>> {
        self.require_student(&record.student_id)?;
        let date = format_date(record.date);
        let previous: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM attendance_records WHERE student_id = ? AND date = ?",
                (&record.student_id, &date),
                |r| r.get(0),
            )
            .optional()?;
        let previous = match previous {
            Some(raw) => Some(
                AttendanceStatus::parse(&raw)
                    .ok_or_else(|| RepoError::InvalidData(format!("status `{raw}`")))?,
            ),
            None => None,
        };
        let note = record
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        self.conn.execute(
            "INSERT INTO attendance_records(student_id, date, status, note, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               note = excluded.note,
               updated_at = excluded.updated_at",
            params![
                record.student_id,
                date,
                record.status.as_str(),
                note,
                now_stamp()
            ],
        )?;
        Ok(previous)
    }

    fn delete_record(&self, student_id: &str, date: NaiveDate) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM attendance_records WHERE student_id = ? AND date = ?",
            (student_id, format_date(date)),
        )?;
        Ok(changed > 0)
    }

    fn list_records(&self, query: &RecordQuery) -> RepoResult<Vec<AttendanceRecord>> {
        let mut sql =
            "SELECT student_id, date, status, note FROM attendance_records WHERE 1 = 1"
                .to_string();
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(student_id) = &query.student_id {
            sql.push_str(" AND student_id = ?");
            bind_values.push(Value::Text(student_id.clone()));
        }
        // ISO dates compare correctly as text.
        if let Some(from) = query.range.from {
            sql.push_str(" AND date >= ?");
            bind_values.push(Value::Text(format_date(from)));
        }
        if let Some(to) = query.range.to {
            sql.push_str(" AND date <= ?");
            bind_values.push(Value::Text(format_date(to)));
        }
        sql.push_str(" ORDER BY student_id, date");

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(student_id, date_raw, status_raw, note)| {
                let date = parse_date(&date_raw)
                    .ok_or_else(|| RepoError::InvalidData(format!("date `{date_raw}`")))?;
                let status = AttendanceStatus::parse(&status_raw)
                    .ok_or_else(|| RepoError::InvalidData(format!("status `{status_raw}`")))?;
                Ok(AttendanceRecord {
                    student_id,
                    date,
                    status,
                    note,
                })
            })
            .collect()
    }
}
