//! Attendance records and per-day state derivation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    CheckIn,
    CheckOut,
}

impl RecordKind {
    /// Persisted spelling — part of the stored-data compatibility contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::CheckIn => "check_in",
            RecordKind::CheckOut => "check_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "check_in" => Some(RecordKind::CheckIn),
            "check_out" => Some(RecordKind::CheckOut),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    HalfDay,
}

impl AttendanceStatus {
    /// Persisted spelling — part of the stored-data compatibility contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::HalfDay => "half_day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            "half_day" => Some(AttendanceStatus::HalfDay),
            _ => None,
        }
    }
}

/// One immutable ledger entry. Corrections are new records with notes, never
/// in-place edits.
///
/// `kind` is `None` only for system-generated absence records, which the
/// end-of-day sweep appends for registered users with no scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: Option<RecordKind>,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_image_path: Option<String>,
    pub confidence_score: Option<f32>,
    pub notes: Option<String>,
}

impl AttendanceRecord {
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// System-generated absence for a user with zero scans on `date`.
    /// No kind, no confidence — the one record shape not produced by a scan.
    pub fn absence(user_id: &str, date: NaiveDate) -> Self {
        let timestamp = date
            .and_hms_opt(23, 59, 59)
            .expect("23:59:59 is a valid time")
            .and_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: None,
            status: AttendanceStatus::Absent,
            timestamp,
            location: None,
            latitude: None,
            longitude: None,
            face_image_path: None,
            confidence_score: None,
            notes: Some("no scan recorded".to_string()),
        }
    }
}

/// Per-(user, day) scan state, re-derived from the ordered record sequence on
/// every decision. Nothing long-lived caches it.
#[derive(Debug, Clone, PartialEq)]
pub enum DayState {
    NotCheckedIn,
    CheckedIn {
        at: DateTime<Utc>,
        status: AttendanceStatus,
    },
    CheckedOut {
        at: DateTime<Utc>,
    },
}

impl DayState {
    /// Fold a day's records (ascending by timestamp) into the current state.
    /// Absence records carry no kind and do not advance the state.
    pub fn from_records(records: &[AttendanceRecord]) -> Self {
        let mut state = DayState::NotCheckedIn;
        for record in records {
            match record.kind {
                Some(RecordKind::CheckIn) => {
                    if matches!(state, DayState::NotCheckedIn) {
                        state = DayState::CheckedIn {
                            at: record.timestamp,
                            status: record.status,
                        };
                    }
                }
                Some(RecordKind::CheckOut) => {
                    if matches!(state, DayState::CheckedIn { .. }) {
                        state = DayState::CheckedOut {
                            at: record.timestamp,
                        };
                    }
                }
                None => {}
            }
        }
        state
    }
}
