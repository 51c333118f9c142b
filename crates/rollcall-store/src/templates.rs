//! Face template persistence — enrollment, revocation, active-set loading.

use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, EmbeddingRepository, FaceTemplate, StoreError};
use rusqlite::params;

use crate::{store_err, timestamp_from_text, timestamp_to_text, Store};

impl Store {
    /// Insert a new active template for `user_id`. Existing templates stay
    /// active — multiple enrollments per user (glasses, lighting) are normal.
    pub fn enroll_template(
        &self,
        user_id: &str,
        embedding: &Embedding,
        created_at: DateTime<Utc>,
    ) -> Result<FaceTemplate, StoreError> {
        let template = FaceTemplate {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            embedding: embedding.clone(),
            created_at,
            active: true,
        };
        let values = serde_json::to_string(&template.embedding.values)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO face_templates (id, user_id, embedding, created_at, active)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![
                    template.id,
                    template.user_id,
                    values,
                    timestamp_to_text(template.created_at)
                ],
            )
            .map_err(store_err)?;

        tracing::info!(user_id, template_id = %template.id, "template enrolled");
        Ok(template)
    }

    /// Deactivate every active template for `user_id` (re-enrollment or
    /// revocation). Rows are kept; nothing is hard-deleted.
    pub fn deactivate_user_templates(&self, user_id: &str) -> Result<usize, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE face_templates SET active = 0 WHERE user_id = ?1 AND active = 1",
                params![user_id],
            )
            .map_err(store_err)?;
        if changed > 0 {
            tracing::info!(user_id, count = changed, "templates deactivated");
        }
        Ok(changed)
    }
}

impl EmbeddingRepository for Store {
    fn load_active(&self) -> Result<Vec<FaceTemplate>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, embedding, created_at
                 FROM face_templates WHERE active = 1 ORDER BY created_at",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(store_err)?;

        let mut templates = Vec::new();
        for row in rows {
            let (id, user_id, embedding_json, created_at) = row.map_err(store_err)?;
            let values: Vec<f32> = serde_json::from_str(&embedding_json).map_err(|e| {
                StoreError::Corrupt(format!("template {id}: bad embedding JSON: {e}"))
            })?;
            templates.push(FaceTemplate {
                id,
                user_id,
                embedding: Embedding::new(values),
                created_at: timestamp_from_text(&created_at)?,
                active: true,
            });
        }
        Ok(templates)
    }

    fn registered_user_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT user_id FROM face_templates WHERE active = 1 ORDER BY user_id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }
}
