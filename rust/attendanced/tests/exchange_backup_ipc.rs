use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .env_remove("ATTENDANCED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    request_ok(stdin, reader, id, "students.create", json!({ "name": name }))["studentId"]
        .as_str()
        .expect("studentId")
        .to_string()
}

fn record(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    date: &str,
    status: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "attendance.record",
        json!({ "studentId": student_id, "date": date, "status": status }),
    );
}

#[test]
fn attendance_csv_export_preview_and_apply() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let files = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let ann = create_student(&mut stdin, &mut reader, "2", "Lee, Ann");
    record(&mut stdin, &mut reader, "3", &ann, "2024-09-02", "present");
    record(&mut stdin, &mut reader, "4", &ann, "2024-09-03", "absent");

    let export_path = files.path().join("attendance.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exchange.exportAttendanceCsv",
        json!({ "outPath": export_path.to_string_lossy() }),
    );
    assert_eq!(exported["rowsExported"], json!(2));
    let text = std::fs::read_to_string(&export_path).expect("read export");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "student_id,student_name,date,status,note");
    assert!(lines
        .iter()
        .any(|l| *l == format!("{},\"Lee, Ann\",2024-09-03,absent,", ann)));

    let import_path = files.path().join("incoming.csv");
    let incoming = format!(
        "student_id,student_name,date,status,note\n\
         {ann},Ann,2024-09-05,present,\n\
         {ann},Ann,2024-09-02,E,field trip\n\
         ghost,Nobody,2024-09-05,present,\n\
         {ann},Ann,2024-13-01,present,\n\
         {ann},Ann,2024-09-06,sick,\n\
         {ann},Ann,2024-09-05,absent,\n",
        ann = ann
    );
    std::fs::write(&import_path, incoming).expect("write incoming");

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exchange.previewAttendanceCsv",
        json!({ "inPath": import_path.to_string_lossy() }),
    );
    assert_eq!(preview["rowsTotal"], json!(6));
    assert_eq!(preview["rowsValid"], json!(2));
    let codes: Vec<&str> = preview["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    for expected in ["bad_date", "bad_status", "missing_student", "duplicate_row"] {
        assert!(codes.contains(&expected), "missing warning {}", expected);
    }

    // Preview does not write.
    let listed = request_ok(&mut stdin, &mut reader, "7", "attendance.list", json!({}));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(2));

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exchange.applyAttendanceCsv",
        json!({ "inPath": import_path.to_string_lossy() }),
    );
    assert_eq!(applied["inserted"], json!(1));
    assert_eq!(applied["replaced"], json!(1));
    assert_eq!(applied["skipped"], json!(4));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.list",
        json!({ "studentId": ann }),
    );
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 3);
    let status_on = |date: &str| {
        records
            .iter()
            .find(|r| r["date"] == json!(date))
            .map(|r| r["status"].clone())
    };
    assert_eq!(status_on("2024-09-02"), Some(json!("excused")));
    assert_eq!(status_on("2024-09-05"), Some(json!("absent")));

    let windowed = request_ok(
        &mut stdin,
        &mut reader,
        "9b",
        "exchange.previewAttendanceCsv",
        json!({ "inPath": import_path.to_string_lossy(), "from": "2024-09-03" }),
    );
    assert_eq!(windowed["rowsValid"], json!(1));
    assert!(windowed["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .any(|w| w["code"] == json!("out_of_range") && w["line"] == json!(3)));

    let bad_header = files.path().join("bad_header.csv");
    std::fs::write(&bad_header, "id,date,status\n").expect("write bad header");
    let resp = request(
        &mut stdin,
        &mut reader,
        "10",
        "exchange.previewAttendanceCsv",
        json!({ "inPath": bad_header.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));
}

#[test]
fn multi_line_notes_survive_export_and_apply() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let files = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let ann = create_student(&mut stdin, &mut reader, "2", "Ann");
    let note = "left at noon\nparent called, \"sick\"";
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.record",
        json!({ "studentId": ann, "date": "2024-09-02", "status": "excused", "note": note }),
    );
    record(&mut stdin, &mut reader, "4", &ann, "2024-09-03", "present");

    let path = files.path().join("notes.csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exchange.exportAttendanceCsv",
        json!({ "outPath": path.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.delete",
        json!({ "studentId": ann, "date": "2024-09-02" }),
    );

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "exchange.applyAttendanceCsv",
        json!({ "inPath": path.to_string_lossy() }),
    );
    assert_eq!(applied["rowsTotal"], json!(2));
    assert_eq!(applied["inserted"], json!(1));
    assert_eq!(applied["warnings"], json!([]));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.list",
        json!({ "studentId": ann, "from": "2024-09-02", "to": "2024-09-02" }),
    );
    assert_eq!(listed["records"][0]["status"], json!("excused"));
    assert_eq!(listed["records"][0]["note"], json!(note));
}

#[test]
fn summary_report_lists_each_student() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let files = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let ann = create_student(&mut stdin, &mut reader, "2", "Ann");
    let cy = create_student(&mut stdin, &mut reader, "3", "Cy");
    record(&mut stdin, &mut reader, "4", &ann, "2024-09-02", "present");
    record(&mut stdin, &mut reader, "5", &ann, "2024-09-03", "present");
    record(&mut stdin, &mut reader, "6", &ann, "2024-09-04", "tardy");
    record(&mut stdin, &mut reader, "7", &ann, "2024-09-05", "absent");

    let out = files.path().join("summary.csv");
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.attendanceSummaryCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(report["rowsExported"], json!(2));
    let text = std::fs::read_to_string(&out).expect("read summary");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "student_id,name,present,absent,tardy,excused,total,rate,letter,at_risk"
    );
    assert_eq!(lines[1], format!("{},Ann,2,1,1,0,4,62.5,D,yes", ann));
    assert_eq!(lines[2], format!("{},Cy,0,0,0,0,0,0.0,F,no", cy));
}

#[test]
fn workspace_bundle_round_trip_restores_data() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let files = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let ann = create_student(&mut stdin, &mut reader, "2", "Ann");
    record(&mut stdin, &mut reader, "3", &ann, "2024-09-02", "present");

    let bundle = files.path().join("backup.zip");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("attendance-workspace-v1"));
    assert_eq!(exported["entryCount"], json!(2));
    assert_eq!(exported["dbSha256"].as_str().map(|s| s.len()), Some(64));

    let _ = create_student(&mut stdin, &mut reader, "5", "Ben");
    record(&mut stdin, &mut reader, "6", &ann, "2024-09-03", "absent");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], json!("attendance-workspace-v1"));

    let students = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(1));
    let listed = request_ok(&mut stdin, &mut reader, "9", "attendance.list", json!({}));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));

    let missing = request(
        &mut stdin,
        &mut reader,
        "10",
        "backup.importWorkspaceBundle",
        json!({ "inPath": files.path().join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));
}

#[test]
fn rejected_database_import_leaves_workspace_usable() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let files = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let ann = create_student(&mut stdin, &mut reader, "2", "Ann");
    record(&mut stdin, &mut reader, "3", &ann, "2024-09-02", "present");

    let newer = files.path().join("newer.sqlite3");
    {
        let conn = rusqlite::Connection::open(&newer).expect("open newer db");
        conn.execute_batch("CREATE TABLE future(x TEXT); PRAGMA user_version = 99;")
            .expect("newer schema");
    }
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({ "inPath": newer.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("io_failed"));

    let students = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(students["students"][0]["name"], json!("Ann"));
    let listed = request_ok(&mut stdin, &mut reader, "6", "attendance.list", json!({}));
    assert_eq!(listed["records"].as_array().map(|a| a.len()), Some(1));
}
