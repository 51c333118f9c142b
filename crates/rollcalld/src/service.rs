//! Scan service: lock-free matching in the caller, a single-writer ledger
//! actor for the decide-then-append path.
//!
//! Two concurrent scans for the same user must never both observe an
//! un-checked-in day. Matching needs no such protection, so it runs against
//! the gallery snapshot before anything is enqueued; only the ledger commit
//! crosses into the actor thread, which owns the SQLite connection and
//! serializes every decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use rollcall_core::{
    AppendError, AttendanceRecord, AttendanceRepository, Candidate, CosineMatcher, DayState,
    Embedding, EmbeddingRepository, Gallery, MatchOutcome, MatchPolicy, Matcher, RecordKind,
    RefreshStats, RuleEngine, ScanDecision, ScanEvent, ShiftPolicy, StoreError,
};
use rollcall_store::Store;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The ledger actor could not be reached within the commit window, or a
    /// lost race persisted through the retry. Retryable by the caller.
    #[error("ledger busy; retry the scan")]
    ConcurrencyExceeded,
    #[error("embedding has {got} components, expected {expected}")]
    WrongDimension { got: usize, expected: usize },
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("append: {0}")]
    Append(#[from] AppendError),
    #[error("ledger thread exited")]
    ChannelClosed,
}

/// Optional capture context forwarded onto the ledger record. Location is
/// recorded as reported, never validated here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanMeta {
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_image_path: Option<String>,
}

/// Business result of one scan. Every variant is a legitimate outcome the
/// kiosk branches on; none of them is an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    CheckedIn { record: AttendanceRecord },
    CheckedOut { record: AttendanceRecord },
    NoMatch { best_score: f32 },
    Ambiguous { best: Candidate, runner_up: Candidate },
    Duplicate { since_last_secs: i64 },
}

/// Messages sent from handlers to the ledger thread.
enum LedgerRequest {
    Commit {
        event: ScanEvent,
        reply: oneshot::Sender<Result<ScanOutcome, ServiceError>>,
    },
    Enroll {
        user_id: String,
        embedding: Embedding,
        replace: bool,
        reply: oneshot::Sender<Result<String, ServiceError>>,
    },
    Deactivate {
        user_id: String,
        reply: oneshot::Sender<Result<usize, ServiceError>>,
    },
    Records {
        user_id: String,
        date: NaiveDate,
        reply: oneshot::Sender<Result<Vec<AttendanceRecord>, ServiceError>>,
    },
    SweepAbsences {
        date: NaiveDate,
        reply: oneshot::Sender<Result<usize, ServiceError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<RefreshStats, ServiceError>>,
    },
}

/// Clone-safe handle to the scan service.
#[derive(Clone)]
pub struct AttendanceService {
    gallery: Arc<Gallery>,
    match_policy: MatchPolicy,
    tx: mpsc::Sender<LedgerRequest>,
    commit_timeout: Duration,
}

impl AttendanceService {
    /// Build the gallery, run an initial refresh, and spawn the ledger actor
    /// on a dedicated OS thread. Fails fast if the store is unusable.
    pub fn spawn(
        store: Store,
        embedding_dim: usize,
        match_policy: MatchPolicy,
        shift_policy: ShiftPolicy,
        commit_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let gallery = Arc::new(Gallery::new(embedding_dim));
        let stats = gallery.refresh(&store)?;
        tracing::info!(
            templates = stats.loaded,
            skipped = stats.dimension_mismatches,
            dim = embedding_dim,
            "gallery loaded"
        );

        let engine = RuleEngine::new(shift_policy);
        let (tx, mut rx) = mpsc::channel::<LedgerRequest>(32);

        let actor_gallery = gallery.clone();
        std::thread::Builder::new()
            .name("rollcall-ledger".into())
            .spawn(move || {
                tracing::info!("ledger thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        LedgerRequest::Commit { event, reply } => {
                            let _ = reply.send(commit(&store, &engine, event));
                        }
                        LedgerRequest::Enroll {
                            user_id,
                            embedding,
                            replace,
                            reply,
                        } => {
                            let _ = reply.send(enroll(
                                &store,
                                &actor_gallery,
                                &user_id,
                                &embedding,
                                replace,
                            ));
                        }
                        LedgerRequest::Deactivate { user_id, reply } => {
                            let _ = reply.send(deactivate(&store, &actor_gallery, &user_id));
                        }
                        LedgerRequest::Records {
                            user_id,
                            date,
                            reply,
                        } => {
                            let _ = reply.send(
                                store
                                    .records_for_user_on_date(&user_id, date)
                                    .map_err(ServiceError::from),
                            );
                        }
                        LedgerRequest::SweepAbsences { date, reply } => {
                            let _ = reply.send(sweep_absences(&store, date));
                        }
                        LedgerRequest::Refresh { reply } => {
                            let _ = reply.send(
                                actor_gallery.refresh(&store).map_err(ServiceError::from),
                            );
                        }
                    }
                }
                tracing::info!("ledger thread exiting");
            })
            .expect("failed to spawn ledger thread");

        Ok(Self {
            gallery,
            match_policy,
            tx,
            commit_timeout,
        })
    }

    /// Match a probe and, on a positive identification, commit the resulting
    /// attendance decision. Matching runs here, unserialized; the commit
    /// waits for the ledger actor at most `commit_timeout`.
    pub async fn scan(
        &self,
        probe: Embedding,
        timestamp: DateTime<Utc>,
        meta: ScanMeta,
    ) -> Result<ScanOutcome, ServiceError> {
        let snapshot = self.gallery.snapshot();
        match CosineMatcher.best_match(&probe, &snapshot.templates, &self.match_policy) {
            MatchOutcome::NoMatch { best_score } => {
                tracing::debug!(best_score, "scan matched nobody");
                Ok(ScanOutcome::NoMatch { best_score })
            }
            MatchOutcome::Ambiguous { best, runner_up } => {
                tracing::warn!(
                    best = %best.user_id,
                    runner_up = %runner_up.user_id,
                    gap = best.score - runner_up.score,
                    "ambiguous scan"
                );
                Ok(ScanOutcome::Ambiguous { best, runner_up })
            }
            MatchOutcome::Match { user_id, score } => {
                let event = ScanEvent {
                    user_id,
                    timestamp,
                    confidence: score,
                    location: meta.location,
                    latitude: meta.latitude,
                    longitude: meta.longitude,
                    face_image_path: meta.face_image_path,
                };
                self.commit_with_timeout(event).await
            }
        }
    }

    async fn commit_with_timeout(&self, event: ScanEvent) -> Result<ScanOutcome, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wait = async {
            self.tx
                .send(LedgerRequest::Commit {
                    event,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| ServiceError::ChannelClosed)?;
            reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
        };
        match tokio::time::timeout(self.commit_timeout, wait).await {
            Ok(result) => result,
            // The commit may still land after the deadline; the caller is
            // told to retry, and a landed commit turns that retry into a
            // duplicate rather than a second record.
            Err(_) => Err(ServiceError::ConcurrencyExceeded),
        }
    }

    pub async fn enroll(
        &self,
        user_id: &str,
        embedding: Embedding,
        replace: bool,
    ) -> Result<String, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LedgerRequest::Enroll {
                user_id: user_id.to_string(),
                embedding,
                replace,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    pub async fn deactivate(&self, user_id: &str) -> Result<usize, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LedgerRequest::Deactivate {
                user_id: user_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    pub async fn records(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LedgerRequest::Records {
                user_id: user_id.to_string(),
                date,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    /// Append system absences for every registered user with no records on
    /// `date`. Idempotent: any existing record for the day skips the user.
    pub async fn sweep_absences(&self, date: NaiveDate) -> Result<usize, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LedgerRequest::SweepAbsences {
                date,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    pub async fn refresh_gallery(&self) -> Result<RefreshStats, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LedgerRequest::Refresh { reply: reply_tx })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    pub fn gallery_dim(&self) -> usize {
        self.gallery.dim()
    }

    pub fn gallery_size(&self) -> usize {
        self.gallery.snapshot().templates.len()
    }
}

/// Read-decide-append for one matched scan. Runs on the ledger thread only.
/// A `Conflict` means an external writer won a race on the same (user, day);
/// one retry re-reads the day, after which the state machine usually turns
/// the scan into a duplicate.
fn commit(
    store: &Store,
    engine: &RuleEngine,
    event: ScanEvent,
) -> Result<ScanOutcome, ServiceError> {
    let date = event.timestamp.date_naive();
    for attempt in 0..2u8 {
        let records = store.records_for_user_on_date(&event.user_id, date)?;
        let state = DayState::from_records(&records);

        let record = match engine.decide(&state, &event) {
            ScanDecision::Duplicate { since_last_secs } => {
                tracing::info!(
                    user_id = %event.user_id,
                    since_last_secs,
                    "duplicate scan rejected"
                );
                return Ok(ScanOutcome::Duplicate { since_last_secs });
            }
            ScanDecision::Append(record) => record,
        };

        match store.append(&record) {
            Ok(()) => {
                tracing::info!(
                    user_id = %record.user_id,
                    kind = ?record.kind,
                    status = record.status.as_str(),
                    "attendance recorded"
                );
                return Ok(match record.kind {
                    Some(RecordKind::CheckOut) => ScanOutcome::CheckedOut { record },
                    _ => ScanOutcome::CheckedIn { record },
                });
            }
            Err(AppendError::Conflict) if attempt == 0 => {
                tracing::warn!(
                    user_id = %event.user_id,
                    "append lost a race; re-reading day state"
                );
            }
            Err(AppendError::Conflict) => return Err(ServiceError::ConcurrencyExceeded),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::ConcurrencyExceeded)
}

fn enroll(
    store: &Store,
    gallery: &Gallery,
    user_id: &str,
    embedding: &Embedding,
    replace: bool,
) -> Result<String, ServiceError> {
    if embedding.dim() != gallery.dim() {
        return Err(ServiceError::WrongDimension {
            got: embedding.dim(),
            expected: gallery.dim(),
        });
    }
    if replace {
        store.deactivate_user_templates(user_id)?;
    }
    let template = store.enroll_template(user_id, embedding, Utc::now())?;
    gallery.refresh(store)?;
    Ok(template.id)
}

fn deactivate(store: &Store, gallery: &Gallery, user_id: &str) -> Result<usize, ServiceError> {
    let count = store.deactivate_user_templates(user_id)?;
    gallery.refresh(store)?;
    Ok(count)
}

fn sweep_absences(store: &Store, date: NaiveDate) -> Result<usize, ServiceError> {
    let mut appended = 0usize;
    for user_id in store.registered_user_ids()? {
        if !store.records_for_user_on_date(&user_id, date)?.is_empty() {
            continue;
        }
        store.append(&AttendanceRecord::absence(&user_id, date))?;
        appended += 1;
    }
    tracing::info!(date = %date, appended, "absence sweep complete");
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::AttendanceStatus;

    const DIM: usize = 4;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, h, m, 0).unwrap()
    }

    fn service() -> AttendanceService {
        let store = Store::open_in_memory().unwrap();
        AttendanceService::spawn(
            store,
            DIM,
            MatchPolicy {
                accept_threshold: 0.5,
                ambiguity_margin: 0.05,
            },
            ShiftPolicy::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn alice() -> Embedding {
        Embedding::new(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn bob() -> Embedding {
        Embedding::new(vec![0.0, 1.0, 0.0, 0.0])
    }

    #[tokio::test]
    async fn test_scan_of_stranger_is_no_match() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();

        let outcome = service
            .scan(bob(), ts(8, 55), ScanMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::NoMatch { .. }));
        assert!(service.records("alice", ts(8, 55).date_naive()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_day_lifecycle() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();

        // 08:55 with a 09:00 shift and 10 min grace: present check-in.
        let outcome = service
            .scan(alice(), ts(8, 55), ScanMeta::default())
            .await
            .unwrap();
        match outcome {
            ScanOutcome::CheckedIn { record } => {
                assert_eq!(record.status, AttendanceStatus::Present);
                assert!(record.confidence_score.unwrap() > 0.99);
            }
            other => panic!("expected check-in, got {other:?}"),
        }

        // One minute later: same physical scan, rejected without a record.
        let outcome = service
            .scan(alice(), ts(8, 56), ScanMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Duplicate { since_last_secs: 60 }));

        // 13:10: past the separation window, short of a full day.
        let outcome = service
            .scan(alice(), ts(13, 10), ScanMeta::default())
            .await
            .unwrap();
        match outcome {
            ScanOutcome::CheckedOut { record } => {
                assert_eq!(record.status, AttendanceStatus::HalfDay);
            }
            other => panic!("expected check-out, got {other:?}"),
        }

        // Any further scan that day is a duplicate.
        let outcome = service
            .scan(alice(), ts(17, 0), ScanMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Duplicate { .. }));

        let records = service.records("alice", ts(8, 55).date_naive()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_two_near_twins_are_ambiguous() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();
        service
            .enroll("twin", Embedding::new(vec![1.0, 0.02, 0.0, 0.0]), false)
            .await
            .unwrap();

        let outcome = service
            .scan(alice(), ts(9, 0), ScanMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Ambiguous { .. }));
    }

    #[tokio::test]
    async fn test_enroll_rejects_wrong_dimension() {
        let service = service();
        let err = service
            .enroll("alice", Embedding::new(vec![1.0, 0.0]), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::WrongDimension { got: 2, expected: DIM }
        ));
    }

    #[tokio::test]
    async fn test_re_enroll_replace_deactivates_old_templates() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();
        assert_eq!(service.gallery_size(), 1);

        service
            .enroll("alice", Embedding::new(vec![0.9, 0.1, 0.0, 0.0]), true)
            .await
            .unwrap();
        assert_eq!(service.gallery_size(), 1);

        service.enroll("alice", alice(), false).await.unwrap();
        assert_eq!(service.gallery_size(), 2);
    }

    #[tokio::test]
    async fn test_deactivate_revokes_matching() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();
        assert_eq!(service.deactivate("alice").await.unwrap(), 1);

        let outcome = service
            .scan(alice(), ts(9, 0), ScanMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::NoMatch { .. }));
    }

    #[tokio::test]
    async fn test_absence_sweep_is_idempotent_and_skips_scanned_users() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();
        service.enroll("bob", bob(), false).await.unwrap();

        // Alice scanned; bob did not.
        service
            .scan(alice(), ts(9, 0), ScanMeta::default())
            .await
            .unwrap();

        let date = ts(9, 0).date_naive();
        assert_eq!(service.sweep_absences(date).await.unwrap(), 1);
        // Second sweep finds bob's absence already recorded.
        assert_eq!(service.sweep_absences(date).await.unwrap(), 0);

        let records = service.records("bob", date).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, None);
        assert_eq!(records[0].status, AttendanceStatus::Absent);
        assert_eq!(records[0].confidence_score, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_scans_yield_exactly_one_check_in() {
        let service = service();
        service.enroll("alice", alice(), false).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.scan(alice(), ts(8, 55), ScanMeta::default()).await
            }));
        }

        let mut checked_in = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ScanOutcome::CheckedIn { .. } => checked_in += 1,
                ScanOutcome::Duplicate { .. } => duplicates += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(checked_in, 1);
        assert_eq!(duplicates, 99);

        let records = service.records("alice", ts(8, 55).date_naive()).await.unwrap();
        let check_ins = records
            .iter()
            .filter(|r| r.kind == Some(RecordKind::CheckIn))
            .count();
        assert_eq!(check_ins, 1);
        assert_eq!(records.len(), 1);
    }
}
