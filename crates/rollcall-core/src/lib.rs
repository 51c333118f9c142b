//! rollcall-core — Embedding matching and attendance decision engine.
//!
//! Pure library: no async runtime, no storage engine. The daemon wires a
//! `Gallery` snapshot and an `AttendanceRepository` implementation around the
//! stateless matcher and rule engine defined here.

pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod repo;
pub mod rules;
pub mod types;

pub use gallery::{Gallery, GallerySnapshot, RefreshStats};
pub use ledger::{AttendanceRecord, AttendanceStatus, DayState, RecordKind};
pub use matcher::{Candidate, CosineMatcher, MatchOutcome, MatchPolicy, Matcher};
pub use repo::{AppendError, AttendanceRepository, EmbeddingRepository, StoreError};
pub use rules::{RuleEngine, ScanDecision, ScanEvent, ShiftPolicy};
pub use types::{Embedding, FaceTemplate};
