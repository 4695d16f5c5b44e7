//! Local SQLite database layer for the order core.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! connection state used by the order operations.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{OrderError, OrderResult};

/// Shared database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Fresh in-memory database with the schema applied.
    pub fn open_in_memory() -> OrderResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn lock(&self) -> OrderResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| OrderError::Lock(e.to_string()))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/orders.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. Unlike a cache, this file holds issued
/// invoice numbers, so an open failure is reported rather than recovered by
/// deleting the file.
pub fn init(data_dir: &Path) -> OrderResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| OrderError::Config(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("orders.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path).map_err(|e| {
        error!("Database open failed: {e}");
        e
    })?;

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> OrderResult<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> OrderResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }
    if current > 0 {
        warn!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");
    }

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: orders table.
///
/// Order id sequences restart daily, so `order_id` is unique per
/// `created_day`; `invoice_number` embeds its date and is unique outright.
/// The generators rely on these constraints to turn a racing duplicate into
/// a retryable error.
fn migrate_v1(conn: &Connection) -> OrderResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            invoice_number TEXT UNIQUE,
            client_request_id TEXT UNIQUE,
            product_name TEXT NOT NULL DEFAULT '',
            product_category TEXT NOT NULL DEFAULT '',
            customer_id TEXT,
            total_amount INTEGER NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            fraud_status TEXT,
            admin_status TEXT,
            paid_at TEXT,
            created_day TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (order_id, created_day)
        );

        CREATE INDEX IF NOT EXISTS idx_orders_order_id ON orders(order_id);
        CREATE INDEX IF NOT EXISTS idx_orders_created_day ON orders(created_day);
        CREATE INDEX IF NOT EXISTS idx_orders_payment_status ON orders(payment_status);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1 (orders table)");
    Ok(())
}

/// Migration v2: atomic daily sequence counters.
fn migrate_v2(conn: &Connection) -> OrderResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sequence_counters (
            kind TEXT NOT NULL CHECK (kind IN ('order_id', 'invoice')),
            prefix TEXT NOT NULL,
            day TEXT NOT NULL,
            value INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (kind, prefix, day)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (sequence_counters table)");
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("run_migrations should succeed");

        let tables = table_names(&conn);
        assert!(tables.contains(&"orders".to_string()), "missing orders");
        assert!(
            tables.contains(&"sequence_counters".to_string()),
            "missing sequence_counters"
        );

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run should succeed");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .expect("count versions");
        assert_eq!(count, i64::from(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_order_id_and_invoice_unique() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO orders (id, order_id, invoice_number, created_day)
             VALUES ('a', 'PRAPL001', 'INV20250916001', '2025-09-16')",
            [],
        )
        .expect("first insert");

        let dup_order = conn.execute(
            "INSERT INTO orders (id, order_id, created_day) VALUES ('b', 'PRAPL001', '2025-09-16')",
            [],
        );
        assert!(dup_order.is_err(), "order_id must be unique within a day");

        conn.execute(
            "INSERT INTO orders (id, order_id, created_day) VALUES ('b', 'PRAPL001', '2025-09-17')",
            [],
        )
        .expect("same order id on the next day");

        let dup_invoice = conn.execute(
            "INSERT INTO orders (id, order_id, invoice_number, created_day)
             VALUES ('c', 'PRAPL002', 'INV20250916001', '2025-09-17')",
            [],
        );
        assert!(dup_invoice.is_err(), "invoice_number must be unique");

        // NULL invoice numbers do not collide.
        conn.execute(
            "INSERT INTO orders (id, order_id, created_day) VALUES ('d', 'PRAPL003', '2025-09-16'),
                                                              ('e', 'PRAPL004', '2025-09-16')",
            [],
        )
        .expect("multiple unpaid orders");
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        let dir = std::env::temp_dir().join("cowork_orders_test_wal");
        let _ = std::fs::remove_dir_all(&dir);

        let state = init(&dir).expect("init file db");
        let mode: String = state
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("read journal_mode");
        assert_eq!(mode.to_lowercase(), "wal", "journal_mode should be WAL");
        assert_eq!(state.db_path, dir.join("orders.db"));

        drop(state);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_in_memory_has_schema() {
        let state = DbState::open_in_memory().expect("in-memory state");
        let conn = state.lock().unwrap();
        assert!(table_names(&conn).contains(&"orders".to_string()));
    }
}
