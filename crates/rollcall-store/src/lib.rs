//! rollcall-store — SQLite persistence for templates and attendance records.
//!
//! Implements the `rollcall-core` repository traits. The attendance table's
//! column names are a compatibility contract with existing stored data; the
//! extra `day` column is internal indexing only.

mod records;
mod templates;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::StoreError;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS face_templates (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    embedding  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    active     INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_templates_user_active
    ON face_templates (user_id, active);

CREATE TABLE IF NOT EXISTS attendance_records (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    day              TEXT NOT NULL,
    type             TEXT,
    status           TEXT NOT NULL,
    timestamp        TEXT NOT NULL,
    location         TEXT,
    latitude         REAL,
    longitude        REAL,
    face_image_path  TEXT,
    confidence_score REAL,
    notes            TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_records_one_kind_per_day
    ON attendance_records (user_id, day, type) WHERE type IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_records_user_day
    ON attendance_records (user_id, day);
"#;

/// SQLite-backed store. One connection; the ledger actor owns it exclusively,
/// so every method takes `&self`.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        // WAL keeps readers from blocking the single writer on file-backed DBs.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Ok(Self { conn })
    }
}

pub(crate) fn store_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Canonical timestamp text: fixed-width RFC 3339 UTC with microseconds, so
/// lexicographic order in SQL equals chronological order.
pub(crate) fn timestamp_to_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_from_text(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let store = Store::open_in_memory().unwrap();
        // Schema is idempotent.
        store.conn.execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 11, 8, 55, 0).unwrap();
        let text = timestamp_to_text(ts);
        assert_eq!(text, "2024-03-11T08:55:00.000000Z");
        assert_eq!(timestamp_from_text(&text).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_text_orders_lexicographically() {
        let early = timestamp_to_text(Utc.with_ymd_and_hms(2024, 3, 11, 8, 55, 0).unwrap());
        let late = timestamp_to_text(Utc.with_ymd_and_hms(2024, 3, 11, 13, 10, 0).unwrap());
        assert!(early < late);
    }

    #[test]
    fn test_bad_timestamp_is_corrupt() {
        assert!(matches!(
            timestamp_from_text("yesterday-ish"),
            Err(StoreError::Corrupt(_))
        ));
    }
}
