use crate::ipc::helpers::{
    get_date_range, get_optional_str, get_required_date, get_required_id_list,
    get_required_status, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceRecord;
use crate::repo::{AttendanceRepository, RecordQuery, RepoError, SqliteRepository};
use log::debug;
use rusqlite::Connection;
use serde_json::json;

fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record = AttendanceRecord {
        student_id: get_required_str(params, "studentId")?,
        date: get_required_date(params, "date")?,
        status: get_required_status(params, "status")?,
        note: get_optional_str(params, "note")?,
    };
    let replaced = SqliteRepository::new(conn).record_attendance(&record)?;
    if let Some(prev) = replaced {
        debug!(
            "event=attendance_replace module=ipc student_id={} date={} from={} to={}",
            record.student_id, record.date, prev, record.status
        );
    }
    Ok(json!({ "ok": true, "replaced": replaced }))
}

fn attendance_bulk_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let status = get_required_status(params, "status")?;
    let student_ids = get_required_id_list(params, "studentIds")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut updated = 0usize;
    let mut skipped: Vec<String> = Vec::new();
    {
        let repo = SqliteRepository::new(&tx);
        for student_id in student_ids {
            let record = AttendanceRecord::new(student_id, date, status);
            match repo.record_attendance(&record) {
                Ok(_) => updated += 1,
                Err(RepoError::StudentNotFound(id)) => skipped.push(id),
                Err(e) => return Err(HandlerErr::new("db_update_failed", e.to_string())),
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({
        "ok": true,
        "updated": updated,
        "skipped": skipped.len(),
        "skippedStudentIds": skipped
    }))
}

fn attendance_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let deleted = SqliteRepository::new(conn).delete_record(&student_id, date)?;
    Ok(json!({ "ok": true, "deleted": deleted }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let query = RecordQuery {
        student_id: get_optional_str(params, "studentId")?.filter(|s| !s.trim().is_empty()),
        range: get_date_range(params)?,
    };
    let records = SqliteRepository::new(conn).list_records(&query)?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(with_db(state, req, attendance_record)),
        "attendance.bulkRecord" => Some(with_db(state, req, attendance_bulk_record)),
        "attendance.delete" => Some(with_db(state, req, attendance_delete)),
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        _ => None,
    }
}
