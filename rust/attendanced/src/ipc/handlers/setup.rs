use crate::calc::{Granularity, RatePolicy, ZeroRecordPolicy};
use crate::db;
use crate::grading::{GradeBand, GradeScale};
use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::service::AttendanceSettings;
use log::warn;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Attendance,
    Grading,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "setup.attendance",
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Attendance => {
            let d = AttendanceSettings::default();
            json!({
                "atRiskThreshold": d.at_risk_threshold,
                "tardyWeight": d.policy.tardy_weight,
                "zeroRecordPolicy": d.policy.zero_records.as_str(),
                "defaultGranularity": d.default_granularity.as_str()
            })
        }
        SetupSection::Grading => json!({ "bands": GradeScale::default().bands() }),
    }
}

fn number_in(v: &Value, key: &str, lo: f64, hi: f64) -> Result<f64, String> {
    v.as_f64()
        .filter(|n| n.is_finite() && (lo..=hi).contains(n))
        .ok_or_else(|| format!("{} must be a number between {} and {}", key, lo, hi))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Attendance => match k.as_str() {
                "atRiskThreshold" => {
                    obj.insert(k.clone(), json!(number_in(v, k, 0.0, 100.0)?));
                }
                "tardyWeight" => {
                    obj.insert(k.clone(), json!(number_in(v, k, 0.0, 1.0)?));
                }
                "zeroRecordPolicy" => {
                    let raw = v.as_str().unwrap_or("");
                    if ZeroRecordPolicy::parse(raw).is_none() {
                        return Err("zeroRecordPolicy must be zero or noData".to_string());
                    }
                    obj.insert(k.clone(), json!(raw));
                }
                "defaultGranularity" => {
                    let raw = v.as_str().unwrap_or("");
                    if Granularity::parse(raw).is_none() {
                        return Err("defaultGranularity must be day, week or month".to_string());
                    }
                    obj.insert(k.clone(), json!(raw));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "bands" => {
                    let bands: Vec<GradeBand> = serde_json::from_value(v.clone())
                        .map_err(|e| format!("bands: {}", e))?;
                    let scale = GradeScale::new(bands).map_err(|e| e.to_string())?;
                    obj.insert(k.clone(), json!(scale.bands()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Bad historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                    warn!(
                        "event=setup_load module=ipc status=skipped key={} reason={}",
                        section.key(),
                        msg
                    );
                }
            }
        }
    }
    Ok(current)
}

pub fn load_attendance_settings(conn: &Connection) -> anyhow::Result<AttendanceSettings> {
    let v = load_section(conn, SetupSection::Attendance)?;
    let d = AttendanceSettings::default();
    Ok(AttendanceSettings {
        at_risk_threshold: v
            .get("atRiskThreshold")
            .and_then(|x| x.as_f64())
            .unwrap_or(d.at_risk_threshold),
        policy: RatePolicy {
            tardy_weight: v
                .get("tardyWeight")
                .and_then(|x| x.as_f64())
                .unwrap_or(d.policy.tardy_weight),
            zero_records: v
                .get("zeroRecordPolicy")
                .and_then(|x| x.as_str())
                .and_then(ZeroRecordPolicy::parse)
                .unwrap_or(d.policy.zero_records),
        },
        default_granularity: v
            .get("defaultGranularity")
            .and_then(|x| x.as_str())
            .and_then(Granularity::parse)
            .unwrap_or(d.default_granularity),
    })
}

pub fn load_grade_scale(conn: &Connection) -> anyhow::Result<GradeScale> {
    let v = load_section(conn, SetupSection::Grading)?;
    let bands: Vec<GradeBand> = serde_json::from_value(v.get("bands").cloned().unwrap_or_default())
        .unwrap_or_default();
    Ok(GradeScale::new(bands).unwrap_or_default())
}

fn settings_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let attendance = load_section(conn, SetupSection::Attendance).map_err(settings_err)?;
    let grading = load_section(conn, SetupSection::Grading).map_err(settings_err)?;
    Ok(json!({
        "attendance": attendance,
        "grading": grading
    }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = get_required_str(params, "section")?;
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut current = load_section(conn, section).map_err(settings_err)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true, "section": section_raw, "values": current }))
}

fn grading_lookup(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(percent) = params.get("percent").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("percent must be a number"));
    };
    let scale = load_grade_scale(conn).map_err(settings_err)?;
    let band = scale.band_for(percent);
    Ok(json!({
        "percent": percent,
        "letter": band.map(|b| b.letter.clone()),
        "points": band.and_then(|b| b.points)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        "grading.lookup" => Some(with_db(state, req, grading_lookup)),
        _ => None,
    }
}
