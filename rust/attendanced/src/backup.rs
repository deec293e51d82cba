//! Workspace bundles: a zip holding `manifest.json` and the SQLite database.
//!
//! Both directions write to a sibling `.partial` file first and rename it into
//! place, so a failed export or import never leaves a truncated file behind.

use crate::db::{self, DB_FILE_NAME};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT_V1: &str = "attendance-workspace-v1";
const SQLITE_FORMAT_NAME: &str = "sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/attendance.sqlite3";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    exported_at: u64,
    #[serde(default)]
    db_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

enum Source {
    Bundle,
    Sqlite,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes `bytes` to the `.partial` sibling of `path` and returns that path.
fn stage(path: &Path, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let tmp = partial_path(path);
    let mut f =
        File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("failed to flush {}", tmp.display()))?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> anyhow::Result<()> {
    std::fs::rename(tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))
}

/// Writes `bytes` next to `path` and renames over it.
fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = stage(path, bytes)?;
    commit(&tmp, path)
}

fn build_bundle(db_bytes: &[u8], manifest: &BundleManifest) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    let manifest_json =
        serde_json::to_vec_pretty(manifest).context("failed to serialize manifest")?;
    zip.write_all(&manifest_json)
        .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(db_bytes)
        .context("failed to write database entry")?;

    Ok(zip
        .finish()
        .context("failed to finalize zip bundle")?
        .into_inner())
}

/// Packs the workspace database into a bundle at `out_path`. Callers should
/// not hold an open write transaction on the database.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("workspace database not readable: {}", db_path.display()))?;
    let db_sha256 = sha256_hex(&db_bytes);

    let manifest = BundleManifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        db_sha256: Some(db_sha256.clone()),
    };
    let bundle = build_bundle(&db_bytes, &manifest)?;
    write_atomically(out_path, &bundle)?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256,
    })
}

fn detect(path: &Path) -> anyhow::Result<Source> {
    let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    f.take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if head.starts_with(ZIP_MAGIC) {
        Ok(Source::Bundle)
    } else if head == SQLITE_MAGIC {
        Ok(Source::Sqlite)
    } else {
        bail!(
            "not a workspace bundle or sqlite database: {}",
            path.display()
        )
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle missing {}", name))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read {}", name))?;
    Ok(bytes)
}

fn unpack_bundle(path: &Path) -> anyhow::Result<Vec<u8>> {
    let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = ZipArchive::new(f).context("invalid zip archive")?;

    let manifest: BundleManifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    if let Some(expected) = manifest.db_sha256.as_deref() {
        let actual = sha256_hex(&db_bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            bail!(
                "database checksum mismatch: manifest {} actual {}",
                expected,
                actual
            );
        }
    }
    Ok(db_bytes)
}

/// Replaces the workspace database with the one in `in_path`, which may be a
/// bundle from [`export_workspace_bundle`] or a bare SQLite file. The incoming
/// database is staged and opened first; the workspace is only replaced when it
/// opens cleanly with a supported schema. The caller must close its connection
/// first and reopen afterwards.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let (db_bytes, detected) = match detect(in_path)? {
        Source::Bundle => (unpack_bundle(in_path)?, BUNDLE_FORMAT_V1),
        Source::Sqlite => (
            std::fs::read(in_path)
                .with_context(|| format!("failed to read {}", in_path.display()))?,
            SQLITE_FORMAT_NAME,
        ),
    };
    if !db_bytes.starts_with(SQLITE_MAGIC) {
        bail!("bundle database entry is not a sqlite file");
    }

    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let target = workspace_path.join(DB_FILE_NAME);
    let tmp = stage(&target, &db_bytes)?;
    if let Err(e) = db::verify_db_file(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.context("imported database cannot be opened as a workspace"));
    }
    commit(&tmp, &target)?;

    Ok(ImportSummary {
        bundle_format_detected: detected.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::NewStudent;
    use crate::repo::{AttendanceRepository, SqliteRepository};

    fn seed_workspace(ws: &Path, name: &str) {
        let conn = db::open_db(ws).expect("open");
        SqliteRepository::new(&conn)
            .create_student(&NewStudent::new(name, ""))
            .expect("create");
    }

    fn student_names(ws: &Path) -> Vec<String> {
        let conn = db::open_db(ws).expect("open");
        SqliteRepository::new(&conn)
            .list_students(true)
            .expect("list")
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    fn write_bundle(path: &Path, manifest: &str, db: &[u8]) {
        let mut zip = ZipWriter::new(File::create(path).expect("create"));
        let opts = FileOptions::default();
        zip.start_file(MANIFEST_ENTRY, opts).expect("manifest");
        zip.write_all(manifest.as_bytes()).expect("write manifest");
        zip.start_file(DB_ENTRY, opts).expect("db");
        zip.write_all(db).expect("write db");
        zip.finish().expect("finish");
    }

    #[test]
    fn bundle_round_trip_replaces_target_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        seed_workspace(&src, "Original");
        seed_workspace(&dst, "Overwritten");

        let bundle = dir.path().join("out").join("ws.zip");
        let export = export_workspace_bundle(&src, &bundle).expect("export");
        assert_eq!(export.bundle_format, BUNDLE_FORMAT_V1);
        assert_eq!(export.db_sha256.len(), 64);
        assert!(!partial_path(&bundle).exists());

        let import = import_workspace_bundle(&bundle, &dst).expect("import");
        assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT_V1);
        assert_eq!(student_names(&dst), vec!["Original".to_string()]);
    }

    #[test]
    fn bare_sqlite_file_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        seed_workspace(&src, "Raw");
        let dst = dir.path().join("dst");
        let import =
            import_workspace_bundle(&src.join(DB_FILE_NAME), &dst).expect("import sqlite");
        assert_eq!(import.bundle_format_detected, "sqlite3");
        assert_eq!(student_names(&dst), vec!["Raw".to_string()]);
    }

    #[test]
    fn tampered_bundle_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("bad.zip");
        write_bundle(
            &bundle,
            &format!(r#"{{"format":"{}","dbSha256":"00"}}"#, BUNDLE_FORMAT_V1),
            b"not really a database",
        );
        let err = import_workspace_bundle(&bundle, &dir.path().join("ws"))
            .expect_err("checksum mismatch");
        assert!(err.to_string().contains("checksum"));
        assert!(!dir.path().join("ws").join(DB_FILE_NAME).exists());
    }

    #[test]
    fn foreign_bundle_formats_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("other.zip");
        write_bundle(&bundle, r#"{"format":"something-else"}"#, SQLITE_MAGIC);
        let err = import_workspace_bundle(&bundle, &dir.path().join("ws"))
            .expect_err("unsupported format");
        assert!(err.to_string().contains("unsupported bundle format"));
    }

    #[test]
    fn newer_schema_import_keeps_existing_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = dir.path().join("ws");
        seed_workspace(&ws, "Keep");

        let newer = dir.path().join("newer");
        seed_workspace(&newer, "Future");
        {
            let conn = rusqlite::Connection::open(newer.join(DB_FILE_NAME)).expect("open");
            conn.execute_batch("PRAGMA user_version = 99").expect("bump");
        }
        let err = import_workspace_bundle(&newer.join(DB_FILE_NAME), &ws)
            .expect_err("newer schema");
        assert!(format!("{err:#}").contains("newer than supported"), "{err:#}");
        assert!(!partial_path(&ws.join(DB_FILE_NAME)).exists());
        assert_eq!(student_names(&ws), vec!["Keep".to_string()]);
    }

    #[test]
    fn unknown_files_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let junk = dir.path().join("junk.txt");
        std::fs::write(&junk, "hello").expect("write");
        assert!(import_workspace_bundle(&junk, &dir.path().join("ws")).is_err());
    }
}
