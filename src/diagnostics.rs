//! Diagnostics for Stock Desk.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Cache health**: schema version, invoices waiting for upload, file size
//! - **Log rotation helpers**: used by `init_logging` to cap rolling log files.

use crate::db::DbState;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "desk";

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// State of the local fallback cache, for the About / health screen.
pub fn get_cache_health(db: &DbState) -> Result<Value, String> {
    let (schema_version, pending_invoices, failed_uploads) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let schema_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(|e| format!("schema version: {e}"))?;
        let pending: i64 = conn
            .query_row("SELECT COUNT(*) FROM cached_invoices", [], |row| row.get(0))
            .map_err(|e| format!("count cached invoices: {e}"))?;
        let failed: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM cached_invoices WHERE upload_attempts > 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| format!("count failed uploads: {e}"))?;
        (schema_version, pending, failed)
    };

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "pendingInvoices": pending_invoices,
        "failedUploads": failed_uploads,
        "dbPath": db.db_path.display().to_string(),
        "dbSizeBytes": db_size,
    }))
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`. Returns the number of files removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    if !log_dir.exists() {
        return 0;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
        assert!(info.get("arch").is_some());
    }

    #[test]
    fn cache_health_reports_pending_invoices() {
        let state = db::init_in_memory().unwrap();
        {
            let conn = state.conn.lock().unwrap();
            db::cache_invoice(&conn, "PF-1", "{}", "offline").unwrap();
        }
        let health = get_cache_health(&state).unwrap();
        assert_eq!(health["schemaVersion"], 1);
        assert_eq!(health["pendingInvoices"], 1);
        assert_eq!(health["failedUploads"], 0);
    }

    #[test]
    fn prune_keeps_newest_files_only() {
        let dir = std::env::temp_dir().join(format!("stock-desk-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..(MAX_LOG_FILES + 3) {
            fs::write(dir.join(format!("desk.2024-01-{:02}", i + 1)), b"x").unwrap();
        }
        fs::write(dir.join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(prune_old_logs(&dir), 3);
        let remaining = fs::read_dir(&dir).unwrap().count();
        assert_eq!(remaining, MAX_LOG_FILES + 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_on_missing_dir_is_a_noop() {
        assert_eq!(prune_old_logs(Path::new("/nonexistent/stock-desk-logs")), 0);
    }
}
