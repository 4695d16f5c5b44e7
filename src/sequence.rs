//! Date-keyed sequence counters.
//!
//! Order ids and invoice numbers both end in a 3-digit sequence that
//! restarts every calendar day per prefix. Counters live in the
//! `sequence_counters` table and are advanced with a single
//! `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement, so the
//! increment and the read happen atomically inside SQLite.
//!
//! The first increment for a `(kind, prefix, day)` key is seeded from the
//! highest suffix already present in `orders`, which keeps numbering
//! continuous for rows written before the counter row existed.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Largest sequence that still fits the 3-digit suffix.
pub const MAX_SEQUENCE: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    OrderId,
    Invoice,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceKind::OrderId => "order_id",
            SequenceKind::Invoice => "invoice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub kind: SequenceKind,
    pub prefix: String,
    pub day: NaiveDate,
}

impl SequenceKey {
    pub fn order_id(code: &str, day: NaiveDate) -> Self {
        Self {
            kind: SequenceKind::OrderId,
            prefix: code.to_string(),
            day,
        }
    }

    pub fn invoice(prefix: &str, day: NaiveDate) -> Self {
        Self {
            kind: SequenceKind::Invoice,
            prefix: prefix.to_string(),
            day,
        }
    }
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("sequence store failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("sequence store unavailable: {0}")]
    Unavailable(String),

    #[error("daily sequence exhausted for {prefix} on {day}")]
    Exhausted { prefix: String, day: NaiveDate },
}

/// Atomic increment-and-get per `(kind, prefix, day)`.
pub trait SequenceStore {
    fn next_value(&self, key: &SequenceKey) -> Result<u32, SequenceError>;
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// Counter store bound to a connection (usually the transaction that will
/// also insert or update the order row).
pub struct SqliteSequenceStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSequenceStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

const NEXT_ORDER_SEQUENCE_SQL: &str = "
    INSERT INTO sequence_counters (kind, prefix, day, value, updated_at)
    VALUES (?3, ?1, ?2, (
        SELECT COALESCE(MAX(CAST(substr(order_id, length(?1) + 1) AS INTEGER)), 0)
        FROM orders
        WHERE created_day = ?2 AND order_id GLOB ?1 || '[0-9]*'
    ) + 1, datetime('now'))
    ON CONFLICT(kind, prefix, day) DO UPDATE SET
        value = MAX(sequence_counters.value + 1, excluded.value),
        updated_at = excluded.updated_at
    RETURNING value";

const NEXT_INVOICE_SEQUENCE_SQL: &str = "
    INSERT INTO sequence_counters (kind, prefix, day, value, updated_at)
    VALUES (?3, ?1, ?2, (
        SELECT COALESCE(MAX(CAST(substr(invoice_number, length(?1) + 1) AS INTEGER)), 0)
        FROM orders
        WHERE invoice_number GLOB ?1 || '[0-9]*'
    ) + 1, datetime('now'))
    ON CONFLICT(kind, prefix, day) DO UPDATE SET
        value = MAX(sequence_counters.value + 1, excluded.value),
        updated_at = excluded.updated_at
    RETURNING value";

impl SequenceStore for SqliteSequenceStore<'_> {
    fn next_value(&self, key: &SequenceKey) -> Result<u32, SequenceError> {
        let sql = match key.kind {
            SequenceKind::OrderId => NEXT_ORDER_SEQUENCE_SQL,
            SequenceKind::Invoice => NEXT_INVOICE_SEQUENCE_SQL,
        };
        let day = key.day.format("%Y-%m-%d").to_string();
        let value: i64 = self.conn.query_row(
            sql,
            params![key.prefix, day, key.kind.as_str()],
            |row| row.get(0),
        )?;
        checked(key, value)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local counters, for embedding without a database and for tests.
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    counters: Mutex<HashMap<SequenceKey, u32>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceStore for MemorySequenceStore {
    fn next_value(&self, key: &SequenceKey) -> Result<u32, SequenceError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| SequenceError::Unavailable(e.to_string()))?;
        let value = counters.entry(key.clone()).or_insert(0);
        *value += 1;
        checked(key, i64::from(*value))
    }
}

fn checked(key: &SequenceKey, value: i64) -> Result<u32, SequenceError> {
    match u32::try_from(value) {
        Ok(v) if (1..=MAX_SEQUENCE).contains(&v) => Ok(v),
        _ => Err(SequenceError::Exhausted {
            prefix: key.prefix.clone(),
            day: key.day,
        }),
    }
}

/// Best-effort suffix used when the counter store cannot be reached.
/// Stays inside `1..=999` so the id keeps its 3-digit shape; uniqueness is
/// not guaranteed and callers rely on the storage UNIQUE constraint.
pub fn timestamp_sequence(now: DateTime<Utc>) -> u32 {
    (now.timestamp_millis().rem_euclid(i64::from(MAX_SEQUENCE)) as u32) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    #[test]
    fn test_sqlite_counter_increments_per_prefix_and_day() {
        let conn = test_conn();
        let store = SqliteSequenceStore::new(&conn);

        let prapl = SequenceKey::order_id("PRAPL", day(16));
        assert_eq!(store.next_value(&prapl).unwrap(), 1);
        assert_eq!(store.next_value(&prapl).unwrap(), 2);
        assert_eq!(store.next_value(&prapl).unwrap(), 3);

        // Other prefix, same day
        let prawb = SequenceKey::order_id("PRAWB", day(16));
        assert_eq!(store.next_value(&prawb).unwrap(), 1);

        // Same prefix, next day
        let next_day = SequenceKey::order_id("PRAPL", day(17));
        assert_eq!(store.next_value(&next_day).unwrap(), 1);
    }

    #[test]
    fn test_order_and_invoice_counters_are_independent() {
        let conn = test_conn();
        let store = SqliteSequenceStore::new(&conn);

        assert_eq!(
            store
                .next_value(&SequenceKey::order_id("PRAPL", day(16)))
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .next_value(&SequenceKey::invoice("INV20250916", day(16)))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_counter_rows_record_their_kind() {
        let conn = test_conn();
        let store = SqliteSequenceStore::new(&conn);
        store
            .next_value(&SequenceKey::order_id("PRAPL", day(16)))
            .unwrap();
        store
            .next_value(&SequenceKey::invoice("INV20250916", day(16)))
            .unwrap();

        let kinds: Vec<(String, String)> = conn
            .prepare("SELECT kind, prefix FROM sequence_counters ORDER BY kind")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            kinds,
            vec![
                (SequenceKind::Invoice.as_str().to_string(), "INV20250916".to_string()),
                (SequenceKind::OrderId.as_str().to_string(), "PRAPL".to_string()),
            ]
        );
    }

    #[test]
    fn test_counter_seeded_from_existing_rows() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO orders (id, order_id, product_name, product_category, created_day, created_at, updated_at)
             VALUES ('a', 'PRAPL007', 'Produk Aplikasi', 'Produk', '2025-09-16', datetime('now'), datetime('now')),
                    ('b', 'PRAPLX012', 'x', 'x', '2025-09-16', datetime('now'), datetime('now')),
                    ('c', 'PRAPL040', 'Produk Aplikasi', 'Produk', '2025-09-15', datetime('now'), datetime('now'))",
            [],
        )
        .expect("insert legacy orders");
        conn.execute(
            "UPDATE orders SET invoice_number = 'INV20250916004' WHERE id = 'a'",
            [],
        )
        .expect("set invoice");

        let store = SqliteSequenceStore::new(&conn);
        // Only today's rows with an all-digit suffix after the prefix count.
        assert_eq!(
            store
                .next_value(&SequenceKey::order_id("PRAPL", day(16)))
                .unwrap(),
            8
        );
        assert_eq!(
            store
                .next_value(&SequenceKey::invoice("INV20250916", day(16)))
                .unwrap(),
            5
        );
    }

    #[test]
    fn test_counter_exhaustion_is_reported() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO sequence_counters (kind, prefix, day, value) VALUES ('order_id', 'PRAPL', '2025-09-16', 999)",
            [],
        )
        .unwrap();
        let store = SqliteSequenceStore::new(&conn);
        let err = store
            .next_value(&SequenceKey::order_id("PRAPL", day(16)))
            .unwrap_err();
        assert!(matches!(err, SequenceError::Exhausted { .. }));
    }

    #[test]
    fn test_missing_table_is_a_storage_error() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SqliteSequenceStore::new(&conn);
        let err = store
            .next_value(&SequenceKey::order_id("PRAPL", day(16)))
            .unwrap_err();
        assert!(matches!(err, SequenceError::Storage(_)));
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySequenceStore::new();
        let key = SequenceKey::order_id("PRAPL", day(16));
        assert_eq!(store.next_value(&key).unwrap(), 1);
        assert_eq!(store.next_value(&key).unwrap(), 2);
        assert_eq!(
            store
                .next_value(&SequenceKey::order_id("PRAPL", day(17)))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_timestamp_sequence_stays_three_digits() {
        for millis in [0_i64, 1, 998, 999, 1_000, 1_758_000_123_456] {
            let at = DateTime::<Utc>::from_timestamp_millis(millis).unwrap();
            let seq = timestamp_sequence(at);
            assert!((1..=MAX_SEQUENCE).contains(&seq), "{millis} -> {seq}");
        }
    }
}
