//! In-memory view of enrolled templates, refreshed by atomic snapshot swap.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::repo::{EmbeddingRepository, StoreError};
use crate::types::FaceTemplate;

/// Immutable gallery snapshot. Matchers hold an `Arc` to one of these for the
/// duration of a ranking pass; a concurrent refresh never invalidates it.
#[derive(Debug)]
pub struct GallerySnapshot {
    /// Established embedding dimension. Every template in `templates` has
    /// exactly this many components.
    pub dim: usize,
    pub templates: Vec<FaceTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub loaded: usize,
    /// Enrolled vectors skipped because their length differs from the
    /// gallery dimension. Skipped, never fatal to the load.
    pub dimension_mismatches: usize,
}

/// Enrolled-template registry with lock-free readers.
///
/// The dimension is fixed at construction and never varies. `refresh` builds
/// a fresh snapshot from the repository and swaps it in atomically; matching
/// against the previous snapshot remains valid (bounded staleness).
pub struct Gallery {
    dim: usize,
    snapshot: ArcSwap<GallerySnapshot>,
}

impl Gallery {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            snapshot: ArcSwap::from_pointee(GallerySnapshot {
                dim,
                templates: Vec::new(),
            }),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Current snapshot. Cheap pointer load, safe from any thread.
    pub fn snapshot(&self) -> Arc<GallerySnapshot> {
        self.snapshot.load_full()
    }

    /// Reload active templates from the repository and swap the snapshot.
    ///
    /// Templates whose embedding length differs from the gallery dimension
    /// are skipped and counted, with a warning per offender.
    pub fn refresh<R: EmbeddingRepository>(&self, repo: &R) -> Result<RefreshStats, StoreError> {
        let loaded = repo.load_active()?;

        let mut templates = Vec::with_capacity(loaded.len());
        let mut dimension_mismatches = 0usize;
        for template in loaded {
            if template.embedding.dim() != self.dim {
                tracing::warn!(
                    template_id = %template.id,
                    user_id = %template.user_id,
                    got = template.embedding.dim(),
                    expected = self.dim,
                    "skipping enrolled embedding with wrong dimension"
                );
                dimension_mismatches += 1;
                continue;
            }
            templates.push(template);
        }

        let stats = RefreshStats {
            loaded: templates.len(),
            dimension_mismatches,
        };

        self.snapshot.store(Arc::new(GallerySnapshot {
            dim: self.dim,
            templates,
        }));

        tracing::debug!(
            loaded = stats.loaded,
            skipped = stats.dimension_mismatches,
            "gallery refreshed"
        );
        Ok(stats)
    }
}
