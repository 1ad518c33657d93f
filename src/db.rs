//! Local SQLite fallback cache for Stock Desk.
//!
//! Uses rusqlite with WAL mode. Holds proforma invoices whose remote save
//! failed, so the user's work is not lost. Nothing here is authoritative;
//! the gateway owns all durable state.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Shared handle to the cache connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Initialize the cache at `{cache_dir}/desk.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(cache_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(cache_dir).map_err(|e| format!("Failed to create cache dir: {e}"))?;

    let db_path = cache_dir.join("desk.db");
    info!("Opening cache database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Cache open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Cache open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory cache, used when no cache directory is writable and in tests.
pub fn init_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating cache from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: proforma invoices saved locally after a failed upload.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cached_invoices (
            invoice_number TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            last_error TEXT,
            upload_attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| format!("migrate v1: {e}"))
}

// ---------------------------------------------------------------------------
// Cached invoices
// ---------------------------------------------------------------------------

/// A locally saved invoice awaiting upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedInvoice {
    pub invoice_number: String,
    pub payload: String,
    pub last_error: Option<String>,
    pub upload_attempts: i64,
}

pub fn cache_invoice(
    conn: &Connection,
    invoice_number: &str,
    payload: &str,
    error: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO cached_invoices (invoice_number, payload, last_error, upload_attempts)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(invoice_number) DO UPDATE SET
            payload = excluded.payload,
            last_error = excluded.last_error,
            upload_attempts = cached_invoices.upload_attempts + 1,
            updated_at = datetime('now')",
        params![invoice_number, payload, error],
    )
    .map_err(|e| format!("cache_invoice: {e}"))?;
    Ok(())
}

pub fn list_cached_invoices(conn: &Connection) -> Result<Vec<CachedInvoice>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT invoice_number, payload, last_error, upload_attempts
             FROM cached_invoices ORDER BY created_at, invoice_number",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CachedInvoice {
                invoice_number: row.get(0)?,
                payload: row.get(1)?,
                last_error: row.get(2)?,
                upload_attempts: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn record_upload_failure(
    conn: &Connection,
    invoice_number: &str,
    error: &str,
) -> Result<(), String> {
    conn.execute(
        "UPDATE cached_invoices
         SET last_error = ?2, upload_attempts = upload_attempts + 1, updated_at = datetime('now')
         WHERE invoice_number = ?1",
        params![invoice_number, error],
    )
    .map_err(|e| format!("record_upload_failure: {e}"))?;
    Ok(())
}

pub fn delete_cached_invoice(conn: &Connection, invoice_number: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM cached_invoices WHERE invoice_number = ?1",
        params![invoice_number],
    )
    .map_err(|e| format!("delete_cached_invoice: {e}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
