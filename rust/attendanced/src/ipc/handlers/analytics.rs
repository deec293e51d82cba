use crate::calc::{self, Granularity};
use crate::ipc::handlers::setup::{load_attendance_settings, load_grade_scale};
use crate::ipc::helpers::{
    get_date_range, get_optional_bool, get_optional_f64, get_optional_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repo::SqliteRepository;
use crate::service::{self, AttendanceSettings};
use rusqlite::Connection;
use serde_json::json;

fn settings(conn: &Connection) -> Result<AttendanceSettings, HandlerErr> {
    load_attendance_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn analytics_student_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let range = get_date_range(params)?;
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let settings = settings(conn)?;
    let scale =
        load_grade_scale(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = service::student_stats(&SqliteRepository::new(conn), &range, include_inactive, &settings)?;

    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            let letter = r.rate.and_then(|rate| scale.letter_for(rate));
            let at_risk = calc::is_at_risk(r, settings.at_risk_threshold);
            let mut v = json!(r);
            v["letter"] = json!(letter);
            v["atRisk"] = json!(at_risk);
            v
        })
        .collect();
    Ok(json!({
        "atRiskThreshold": settings.at_risk_threshold,
        "zeroRecordPolicy": settings.policy.zero_records,
        "students": rows_json
    }))
}

fn analytics_period_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let range = get_date_range(params)?;
    let settings = settings(conn)?;
    let granularity = match get_optional_str(params, "granularity")? {
        Some(raw) => Granularity::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("granularity must be day, week or month"))?,
        None => settings.default_granularity,
    };
    let student_id = get_optional_str(params, "studentId")?.filter(|s| !s.trim().is_empty());
    let periods = service::period_stats(
        &SqliteRepository::new(conn),
        &range,
        granularity,
        student_id.as_deref(),
        &settings,
    )?;
    Ok(json!({
        "granularity": granularity,
        "studentId": student_id,
        "periods": periods
    }))
}

fn analytics_at_risk(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let range = get_date_range(params)?;
    let threshold = get_optional_f64(params, "threshold")?;
    if let Some(t) = threshold {
        if !(0.0..=100.0).contains(&t) {
            return Err(HandlerErr::bad_params("threshold must be between 0 and 100"));
        }
    }
    let settings = settings(conn)?;
    let students = service::at_risk(&SqliteRepository::new(conn), &range, threshold, &settings)?;
    Ok(json!({
        "threshold": threshold.unwrap_or(settings.at_risk_threshold),
        "students": students
    }))
}

fn analytics_overview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let range = get_date_range(params)?;
    let settings = settings(conn)?;
    let overview = service::overview(&SqliteRepository::new(conn), &range, &settings)?;
    Ok(json!(overview))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.studentStats" => Some(with_db(state, req, analytics_student_stats)),
        "attendance.periodStats" => Some(with_db(state, req, analytics_period_stats)),
        "attendance.atRisk" => Some(with_db(state, req, analytics_at_risk)),
        "attendance.overview" => Some(with_db(state, req, analytics_overview)),
        _ => None,
    }
}
