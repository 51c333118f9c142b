//! Shift-time policy and the per-day attendance state machine.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Deserialize;

use crate::ledger::{AttendanceRecord, AttendanceStatus, DayState, RecordKind};

/// Shift-time thresholds. Deployment configuration (TOML in the daemon);
/// the engine never hard-codes values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShiftPolicy {
    /// Nominal start of the working day.
    pub shift_start: NaiveTime,
    /// Lateness window after `shift_start` still counted as present.
    pub grace_minutes: i64,
    /// Time of day after which a first check-in only earns half a day.
    pub half_day_cutoff: NaiveTime,
    /// Minimum gap between a check-in and a check-out. Anything sooner is a
    /// repeated read of the same physical scan.
    pub min_separation_minutes: i64,
    /// Worked time below this yields a half-day check-out.
    pub full_day_minutes: i64,
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self {
            shift_start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            grace_minutes: 10,
            half_day_cutoff: NaiveTime::from_hms_opt(12, 0, 0).expect("valid time"),
            min_separation_minutes: 60,
            full_day_minutes: 480,
        }
    }
}

/// A successfully matched scan, ready for a ledger decision.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Matcher confidence for this scan, recorded on the ledger entry.
    pub confidence: f32,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_image_path: Option<String>,
}

/// What a scan does to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanDecision {
    /// Append this record (check-in or check-out per its `kind`).
    Append(AttendanceRecord),
    /// Repeated scan — nothing is appended. `since_last_secs` is the gap to
    /// the record that blocks it, for kiosk cooldown display.
    Duplicate { since_last_secs: i64 },
}

/// Stateless decision engine: every call re-derives the day from the ledger's
/// record sequence, so concurrent correctness rests entirely on the caller
/// serializing decide-then-append per (user, day).
#[derive(Debug, Clone)]
pub struct RuleEngine {
    policy: ShiftPolicy,
}

impl RuleEngine {
    pub fn new(policy: ShiftPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ShiftPolicy {
        &self.policy
    }

    pub fn decide(&self, state: &DayState, scan: &ScanEvent) -> ScanDecision {
        match state {
            DayState::NotCheckedIn => {
                let status = self.check_in_status(scan.timestamp);
                ScanDecision::Append(self.record(scan, RecordKind::CheckIn, status))
            }
            DayState::CheckedIn { at, status } => {
                let elapsed = scan.timestamp.signed_duration_since(*at);
                if elapsed < Duration::minutes(self.policy.min_separation_minutes) {
                    ScanDecision::Duplicate {
                        since_last_secs: elapsed.num_seconds(),
                    }
                } else {
                    let out_status = self.check_out_status(elapsed, *status);
                    ScanDecision::Append(self.record(scan, RecordKind::CheckOut, out_status))
                }
            }
            DayState::CheckedOut { at } => ScanDecision::Duplicate {
                since_last_secs: scan.timestamp.signed_duration_since(*at).num_seconds(),
            },
        }
    }

    fn check_in_status(&self, timestamp: DateTime<Utc>) -> AttendanceStatus {
        let time = timestamp.time();
        let present_until = self.policy.shift_start + Duration::minutes(self.policy.grace_minutes);
        if time <= present_until {
            AttendanceStatus::Present
        } else if time <= self.policy.half_day_cutoff {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::HalfDay
        }
    }

    /// Short days collapse to half-day; a full day keeps whatever the
    /// check-in earned (a late arrival stays late).
    fn check_out_status(&self, elapsed: Duration, check_in_status: AttendanceStatus) -> AttendanceStatus {
        if elapsed < Duration::minutes(self.policy.full_day_minutes) {
            AttendanceStatus::HalfDay
        } else {
            check_in_status
        }
    }

    fn record(&self, scan: &ScanEvent, kind: RecordKind, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: scan.user_id.clone(),
            kind: Some(kind),
            status,
            timestamp: scan.timestamp,
            location: scan.location.clone(),
            latitude: scan.latitude,
            longitude: scan.longitude,
            face_image_path: scan.face_image_path.clone(),
            confidence_score: Some(scan.confidence),
            notes: None,
        }
    }
}
