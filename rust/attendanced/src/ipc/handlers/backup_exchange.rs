use crate::backup;
use crate::db;
use crate::ipc::helpers::{
    csv_quote, current_workspace, get_date_range, get_required_str, parse_csv_record, respond,
    split_csv_records, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, parse_date, AttendanceRecord, AttendanceStatus};
use crate::repo::{AttendanceRepository, RecordQuery, SqliteRepository};
use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const EXCHANGE_HEADER: &str = "student_id,student_name,date,status,note";

fn io_failed(e: anyhow::Error, path: &str) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": path }))
}

fn backup_export(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let workspace = current_workspace(state)?;
    let export = backup::export_workspace_bundle(&workspace, Path::new(&out_path))
        .map_err(|e| io_failed(e, &out_path))?;
    info!(
        "event=backup_export module=ipc status=ok path={} sha256={}",
        out_path, export.db_sha256
    );
    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

/// The connection is closed for the swap and reopened on whatever database is
/// in place afterwards, so a failed import leaves the old workspace usable.
fn backup_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let workspace = current_workspace(state)?;
    if !Path::new(&in_path).is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    state.db = None;
    let imported = backup::import_workspace_bundle(Path::new(&in_path), &workspace);
    state.db = match db::open_db(&workspace) {
        Ok(conn) => Some(conn),
        Err(e) => return Err(HandlerErr::new("db_open_failed", format!("{e:#}"))),
    };
    let imported = imported.map_err(|e| {
        warn!(
            "event=backup_import module=ipc status=error path={} error={e:#}",
            in_path
        );
        io_failed(e, &in_path)
    })?;
    info!(
        "event=backup_import module=ipc status=ok path={} format={}",
        in_path, imported.bundle_format_detected
    );
    Ok(json!({
        "ok": true,
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": imported.bundle_format_detected
    }))
}

fn exchange_export_attendance_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let range = get_date_range(params)?;
    let repo = SqliteRepository::new(conn);
    let names: HashMap<String, String> = repo
        .list_students(true)?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect();
    let records = repo.list_records(&RecordQuery {
        student_id: None,
        range,
    })?;

    let mut out = String::new();
    out.push_str(EXCHANGE_HEADER);
    out.push('\n');
    for r in &records {
        let name = names.get(&r.student_id).map(String::as_str).unwrap_or("");
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_quote(&r.student_id),
            csv_quote(name),
            format_date(r.date),
            r.status,
            csv_quote(r.note.as_deref().unwrap_or(""))
        ));
    }
    std::fs::write(&out_path, out).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": records.len() }))
}

#[derive(Debug, Clone)]
struct ParsedExchangeRow {
    line_no: usize,
    record: AttendanceRecord,
}

/// Returns parsed rows, warnings and the number of non-blank data records.
/// Warnings point at the line a record starts on.
fn parse_exchange_rows(text: &str) -> (Vec<ParsedExchangeRow>, Vec<serde_json::Value>, usize) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    let mut total = 0usize;
    for (idx, (line_no, raw)) in split_csv_records(text).into_iter().enumerate() {
        let record = raw.trim();
        if idx == 0 || record.is_empty() {
            continue;
        }
        total += 1;
        let fields = parse_csv_record(record);
        if fields.len() < 4 {
            warnings.push(json!({
                "line": line_no,
                "code": "bad_columns",
                "message": "expected at least 4 CSV columns"
            }));
            continue;
        }
        let student_id = fields[0].trim().to_string();
        if student_id.is_empty() {
            warnings.push(json!({
                "line": line_no,
                "code": "missing_student_id",
                "message": "student_id is required"
            }));
            continue;
        }
        let Some(date) = parse_date(&fields[2]) else {
            warnings.push(json!({
                "line": line_no,
                "code": "bad_date",
                "message": "date must be YYYY-MM-DD"
            }));
            continue;
        };
        let Some(status) = AttendanceStatus::parse(&fields[3]) else {
            warnings.push(json!({
                "line": line_no,
                "code": "bad_status",
                "message": "status must be present, absent, tardy or excused"
            }));
            continue;
        };
        let note = fields
            .get(4)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        rows.push(ParsedExchangeRow {
            line_no,
            record: AttendanceRecord {
                student_id,
                date,
                status,
                note,
            },
        });
    }
    (rows, warnings, total)
}

struct ExchangePlan {
    rows: Vec<ParsedExchangeRow>,
    warnings: Vec<serde_json::Value>,
    rows_total: usize,
}

/// Parses the file and drops rows for unknown students or outside the
/// optional `from`/`to` window. Later rows for the same student and day
/// supersede earlier ones.
fn plan_exchange(conn: &Connection, params: &serde_json::Value) -> Result<ExchangePlan, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let range = get_date_range(params)?;
    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    if !text
        .lines()
        .next()
        .map(|h| h.trim().eq_ignore_ascii_case(EXCHANGE_HEADER))
        .unwrap_or(false)
    {
        return Err(HandlerErr::bad_params("unexpected CSV header").with_details(json!({
            "expected": EXCHANGE_HEADER
        })));
    }
    let (parsed, mut warnings, rows_total) = parse_exchange_rows(&text);

    let known: HashSet<String> = SqliteRepository::new(conn)
        .list_students(true)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let mut seen: HashMap<(String, NaiveDate), usize> = HashMap::new();
    let mut rows: Vec<ParsedExchangeRow> = Vec::new();
    for row in parsed {
        if !range.contains(row.record.date) {
            warnings.push(json!({
                "line": row.line_no,
                "code": "out_of_range",
                "message": "date is outside the requested window"
            }));
            continue;
        }
        if !known.contains(&row.record.student_id) {
            warnings.push(json!({
                "line": row.line_no,
                "code": "missing_student",
                "message": "student_id does not exist in this workspace"
            }));
            continue;
        }
        let key = (row.record.student_id.clone(), row.record.date);
        if let Some(&prev_idx) = seen.get(&key) {
            warnings.push(json!({
                "line": row.line_no,
                "code": "duplicate_row",
                "message": format!("replaces line {}", rows[prev_idx].line_no)
            }));
            rows[prev_idx] = row;
            continue;
        }
        seen.insert(key, rows.len());
        rows.push(row);
    }
    Ok(ExchangePlan {
        rows,
        warnings,
        rows_total,
    })
}

fn exchange_preview_attendance_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let plan = plan_exchange(conn, params)?;
    let preview: Vec<serde_json::Value> = plan
        .rows
        .iter()
        .take(20)
        .map(|r| json!({ "line": r.line_no, "record": r.record }))
        .collect();
    Ok(json!({
        "rowsTotal": plan.rows_total,
        "rowsValid": plan.rows.len(),
        "warnings": plan.warnings,
        "preview": preview
    }))
}

fn exchange_apply_attendance_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let plan = plan_exchange(conn, params)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut inserted = 0usize;
    let mut replaced = 0usize;
    {
        let repo = SqliteRepository::new(&tx);
        for row in &plan.rows {
            let prev = repo.record_attendance(&row.record).map_err(|e| {
                HandlerErr::new("db_update_failed", e.to_string())
                    .with_details(json!({ "line": row.line_no }))
            })?;
            if prev.is_some() {
                replaced += 1;
            } else {
                inserted += 1;
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    info!(
        "event=exchange_apply module=ipc status=ok inserted={} replaced={} warnings={}",
        inserted,
        replaced,
        plan.warnings.len()
    );
    Ok(json!({
        "ok": true,
        "rowsTotal": plan.rows_total,
        "inserted": inserted,
        "replaced": replaced,
        "skipped": plan.rows_total - plan.rows.len(),
        "warnings": plan.warnings
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(req, backup_export(state, &req.params))),
        "backup.importWorkspaceBundle" => Some(respond(req, backup_import(state, &req.params))),
        "exchange.exportAttendanceCsv" => Some(with_db(state, req, exchange_export_attendance_csv)),
        "exchange.previewAttendanceCsv" => {
            Some(with_db(state, req, exchange_preview_attendance_csv))
        }
        "exchange.applyAttendanceCsv" => Some(with_db(state, req, exchange_apply_attendance_csv)),
        _ => None,
    }
}
