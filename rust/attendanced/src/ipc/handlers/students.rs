use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{NewStudent, StudentPatch};
use crate::repo::{AttendanceRepository, SqliteRepository};
use rusqlite::Connection;
use serde_json::json;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let students = SqliteRepository::new(conn).list_students(include_inactive)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_optional_str(params, "email")?.unwrap_or_default();
    let new = NewStudent {
        active: get_optional_bool(params, "active")?.unwrap_or(true),
        ..NewStudent::new(name, email)
    };
    let student = SqliteRepository::new(conn).create_student(&new)?;
    Ok(json!({ "studentId": student.id, "student": student }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch_json) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    if let Some(obj) = patch_json.as_object() {
        if let Some(unknown) = obj
            .keys()
            .find(|k| !matches!(k.as_str(), "name" | "email" | "active"))
        {
            return Err(HandlerErr::bad_params(format!("unknown student field: {}", unknown)));
        }
    }
    let patch = StudentPatch {
        name: get_optional_str(patch_json, "name")?,
        email: get_optional_str(patch_json, "email")?,
        active: get_optional_bool(patch_json, "active")?,
    };
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("patch must set name, email or active"));
    }
    let student = SqliteRepository::new(conn).update_student(&student_id, &patch)?;
    Ok(json!({ "student": student }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    SqliteRepository::new(conn).delete_student(&student_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
