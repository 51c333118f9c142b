use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use zbus::interface;

use rollcall_core::Embedding;

use crate::service::{AttendanceService, ScanMeta, ServiceError};

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceInterface {
    service: AttendanceService,
}

impl AttendanceInterface {
    pub fn new(service: AttendanceService) -> Self {
        Self { service }
    }
}

/// Scan submission payload: the probe embedding plus capture context.
#[derive(Deserialize)]
struct ScanPayload {
    embedding: Vec<f32>,
    #[serde(flatten)]
    meta: ScanMeta,
}

fn to_fdo(err: ServiceError) -> zbus::fdo::Error {
    match err {
        ServiceError::ConcurrencyExceeded => {
            zbus::fdo::Error::LimitsExceeded("ledger busy; retry the scan".into())
        }
        ServiceError::WrongDimension { .. } => zbus::fdo::Error::InvalidArgs(err.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn parse_date(s: &str) -> zbus::fdo::Result<NaiveDate> {
    s.parse()
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Submit a probe scan. `payload` is JSON:
    /// `{"embedding": [..], "location": ..., "latitude": ..., "longitude": ...,
    ///   "face_image_path": ...}` — everything but the embedding optional.
    /// Returns the outcome as JSON (check-in/check-out record, no-match,
    /// ambiguous, or duplicate).
    async fn scan(&self, payload: &str) -> zbus::fdo::Result<String> {
        let payload: ScanPayload = serde_json::from_str(payload)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad scan payload: {e}")))?;

        let outcome = self
            .service
            .scan(Embedding::new(payload.embedding), Utc::now(), payload.meta)
            .await
            .map_err(to_fdo)?;

        serde_json::to_string(&outcome).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Enroll a face template for `user_id` from a JSON number array.
    /// `replace` deactivates the user's previous templates first.
    async fn enroll(
        &self,
        user_id: &str,
        embedding_json: &str,
        replace: bool,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, replace, "enroll requested");
        let values: Vec<f32> = serde_json::from_str(embedding_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad embedding: {e}")))?;

        self.service
            .enroll(user_id, Embedding::new(values), replace)
            .await
            .map_err(to_fdo)
    }

    /// Deactivate all templates for `user_id`. Returns how many were active.
    async fn deactivate(&self, user_id: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(user_id, "deactivate requested");
        let count = self.service.deactivate(user_id).await.map_err(to_fdo)?;
        Ok(count as u32)
    }

    /// Ledger entries for one user on one day (`YYYY-MM-DD`), as JSON.
    async fn records(&self, user_id: &str, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let records = self.service.records(user_id, date).await.map_err(to_fdo)?;
        serde_json::to_string(&records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Append absence records for registered users with no entries on the
    /// given day. Returns the number appended.
    async fn sweep_absences(&self, date: &str) -> zbus::fdo::Result<u32> {
        let date = parse_date(date)?;
        tracing::info!(date = %date, "absence sweep requested");
        let appended = self.service.sweep_absences(date).await.map_err(to_fdo)?;
        Ok(appended as u32)
    }

    /// Reload active templates from storage. Returns the gallery size.
    async fn refresh_gallery(&self) -> zbus::fdo::Result<u32> {
        let stats = self.service.refresh_gallery().await.map_err(to_fdo)?;
        Ok(stats.loaded as u32)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_dim": self.service.gallery_dim(),
            "templates_loaded": self.service.gallery_size(),
        })
        .to_string())
    }
}
