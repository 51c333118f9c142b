//! Attendance ledger persistence.
//!
//! `append` is transactional and guarded twice: an in-transaction ordering
//! check (never return records out of timestamp order) and a partial unique
//! index on (user_id, day, type) that makes duplicate check-ins/check-outs a
//! constraint violation even against a concurrent external writer.

use chrono::NaiveDate;
use rollcall_core::{
    AppendError, AttendanceRecord, AttendanceRepository, AttendanceStatus, RecordKind, StoreError,
};
use rusqlite::params;

use crate::{store_err, timestamp_from_text, timestamp_to_text, Store};

fn append_err(e: rusqlite::Error) -> AppendError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AppendError::Conflict
        }
        _ => AppendError::Unavailable(e.to_string()),
    }
}

impl AttendanceRepository for Store {
    fn records_for_user_on_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, type, status, timestamp, location, latitude, longitude,
                        face_image_path, confidence_score, notes
                 FROM attendance_records
                 WHERE user_id = ?1 AND day = ?2
                 ORDER BY timestamp ASC",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map(params![user_id, date.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                    row.get::<_, Option<f64>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            })
            .map_err(store_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (
                id,
                user_id,
                kind,
                status,
                timestamp,
                location,
                latitude,
                longitude,
                face_image_path,
                confidence_score,
                notes,
            ) = row.map_err(store_err)?;

            let kind = match kind {
                Some(s) => Some(RecordKind::parse(&s).ok_or_else(|| {
                    StoreError::Corrupt(format!("record {id}: unknown type {s:?}"))
                })?),
                None => None,
            };
            let status = AttendanceStatus::parse(&status).ok_or_else(|| {
                StoreError::Corrupt(format!("record {id}: unknown status {status:?}"))
            })?;

            records.push(AttendanceRecord {
                id,
                user_id,
                kind,
                status,
                timestamp: timestamp_from_text(&timestamp)?,
                location,
                latitude,
                longitude,
                face_image_path,
                confidence_score: confidence_score.map(|c| c as f32),
                notes,
            });
        }
        Ok(records)
    }

    fn append(&self, record: &AttendanceRecord) -> Result<(), AppendError> {
        let day = record.day().to_string();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| AppendError::Unavailable(e.to_string()))?;

        // Ordering guard: nothing on this (user, day) may be newer than the
        // record being appended.
        let latest: Option<String> = tx
            .query_row(
                "SELECT MAX(timestamp) FROM attendance_records
                 WHERE user_id = ?1 AND day = ?2",
                params![record.user_id, day],
                |row| row.get(0),
            )
            .map_err(|e| AppendError::Unavailable(e.to_string()))?;
        if let Some(latest) = latest {
            let latest = timestamp_from_text(&latest)
                .map_err(|e| AppendError::Corrupt(e.to_string()))?;
            if record.timestamp < latest {
                return Err(AppendError::OutOfOrder);
            }
        }

        tx.execute(
            "INSERT INTO attendance_records
                 (id, user_id, day, type, status, timestamp, location, latitude, longitude,
                  face_image_path, confidence_score, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.user_id,
                day,
                record.kind.map(|k| k.as_str()),
                record.status.as_str(),
                timestamp_to_text(record.timestamp),
                record.location,
                record.latitude,
                record.longitude,
                record.face_image_path,
                record.confidence_score.map(|c| c as f64),
                record.notes,
            ],
        )
        .map_err(append_err)?;

        tx.commit().map_err(|e| AppendError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
    }

    fn record(kind: Option<RecordKind>, at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            kind,
            status: AttendanceStatus::Present,
            timestamp: at,
            location: Some("gate-a".to_string()),
            latitude: Some(48.85),
            longitude: Some(2.35),
            face_image_path: None,
            confidence_score: Some(0.91),
            notes: None,
        }
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let store = Store::open_in_memory().unwrap();
        store.append(&record(Some(RecordKind::CheckIn), ts(8, 55))).unwrap();
        store.append(&record(Some(RecordKind::CheckOut), ts(17, 0))).unwrap();

        let records = store.records_for_user_on_date("u1", day()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, Some(RecordKind::CheckIn));
        assert_eq!(records[1].kind, Some(RecordKind::CheckOut));
        assert!(records[0].timestamp < records[1].timestamp);
        assert_eq!(records[0].location.as_deref(), Some("gate-a"));
        assert_eq!(records[0].confidence_score, Some(0.91));
    }

    #[test]
    fn test_second_check_in_same_day_conflicts() {
        let store = Store::open_in_memory().unwrap();
        store.append(&record(Some(RecordKind::CheckIn), ts(8, 55))).unwrap();

        let err = store
            .append(&record(Some(RecordKind::CheckIn), ts(9, 5)))
            .unwrap_err();
        assert!(matches!(err, AppendError::Conflict));

        // The failed append left nothing behind.
        assert_eq!(store.records_for_user_on_date("u1", day()).unwrap().len(), 1);
    }

    #[test]
    fn test_older_timestamp_is_out_of_order() {
        let store = Store::open_in_memory().unwrap();
        store.append(&record(Some(RecordKind::CheckIn), ts(9, 0))).unwrap();

        let err = store
            .append(&record(Some(RecordKind::CheckOut), ts(8, 30)))
            .unwrap_err();
        assert!(matches!(err, AppendError::OutOfOrder));
    }

    #[test]
    fn test_absence_records_do_not_hit_the_unique_index() {
        let store = Store::open_in_memory().unwrap();
        // Two different users absent the same day; type is NULL for both.
        let a = AttendanceRecord::absence("u1", day());
        let b = AttendanceRecord::absence("u2", day());
        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let records = store.records_for_user_on_date("u1", day()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, None);
        assert_eq!(records[0].status, AttendanceStatus::Absent);
        assert_eq!(records[0].confidence_score, None);
    }

    #[test]
    fn test_days_are_isolated() {
        let store = Store::open_in_memory().unwrap();
        store.append(&record(Some(RecordKind::CheckIn), ts(8, 55))).unwrap();

        let next_day = Utc.with_ymd_and_hms(2024, 3, 12, 8, 55, 0).unwrap();
        store.append(&record(Some(RecordKind::CheckIn), next_day)).unwrap();

        assert_eq!(store.records_for_user_on_date("u1", day()).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO attendance_records
                     (id, user_id, day, type, status, timestamp)
                 VALUES ('r1', 'u1', '2024-03-11', 'check_in', 'vacationing',
                         '2024-03-11T08:55:00.000000Z')",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.records_for_user_on_date("u1", day()),
            Err(StoreError::Corrupt(_))
        ));
    }
}
