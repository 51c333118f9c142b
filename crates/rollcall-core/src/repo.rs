//! Repository contracts implemented by the storage layer.

use chrono::NaiveDate;
use thiserror::Error;

use crate::ledger::AttendanceRecord;
use crate::types::FaceTemplate;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A persisted row failed to decode. Aborts the single read that hit it;
    /// the rest of the store stays usable.
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum AppendError {
    /// The record collides with an existing check-in/check-out for the same
    /// user and day (a concurrent writer got there first).
    #[error("record conflicts with an existing entry for that day")]
    Conflict,
    /// The record's timestamp is earlier than the day's latest entry.
    #[error("record is older than the day's latest entry")]
    OutOfOrder,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Source of enrolled embeddings, read at gallery refresh time.
pub trait EmbeddingRepository {
    /// All active templates, any order. Dimension checks happen in the
    /// gallery, not here.
    fn load_active(&self) -> Result<Vec<FaceTemplate>, StoreError>;

    /// Distinct user ids with at least one active template. Drives the
    /// end-of-day absence sweep.
    fn registered_user_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Append-only attendance ledger.
pub trait AttendanceRepository {
    /// Records for one user on one calendar day, ascending by timestamp.
    fn records_for_user_on_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Atomic, all-or-nothing append. Never leaves a partial record; rejects
    /// writes that would break the per-day invariants.
    fn append(&self, record: &AttendanceRecord) -> Result<(), AppendError>;
}
