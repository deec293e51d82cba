use crate::calc::{is_at_risk, StudentAttendance};
use crate::grading::GradeScale;
use crate::ipc::handlers::setup::{load_attendance_settings, load_grade_scale};
use crate::ipc::helpers::{
    csv_quote, get_date_range, get_optional_bool, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repo::SqliteRepository;
use crate::service::{self, AttendanceSettings};
use rusqlite::Connection;
use serde_json::json;

const SUMMARY_HEADER: &str =
    "student_id,name,present,absent,tardy,excused,total,rate,letter,at_risk";

fn summary_csv(
    rows: &[StudentAttendance],
    settings: &AttendanceSettings,
    scale: &GradeScale,
) -> String {
    let mut out = String::new();
    out.push_str(SUMMARY_HEADER);
    out.push('\n');
    for r in rows {
        let rate = r.rate.map(|v| format!("{:.1}", v)).unwrap_or_default();
        let letter = r.rate.and_then(|v| scale.letter_for(v)).unwrap_or("");
        let at_risk = is_at_risk(r, settings.at_risk_threshold);
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            csv_quote(&r.student_id),
            csv_quote(&r.name),
            r.counts.present,
            r.counts.absent,
            r.counts.tardy,
            r.counts.excused,
            r.total,
            rate,
            csv_quote(letter),
            if at_risk { "yes" } else { "no" }
        ));
    }
    out
}

fn reports_attendance_summary_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let range = get_date_range(params)?;
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let settings = load_attendance_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let scale =
        load_grade_scale(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = service::student_stats(&SqliteRepository::new(conn), &range, include_inactive, &settings)?;

    std::fs::write(&out_path, summary_csv(&rows, &settings, &scale)).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.attendanceSummaryCsv" => Some(with_db(state, req, reports_attendance_summary_csv)),
        _ => None,
    }
}
