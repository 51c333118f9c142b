use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newton–Raphson rounds for [`stable_sqrt`]. Fixed so similarity scores are
/// bit-identical across platforms and libm versions.
const SQRT_ROUNDS: u32 = 20;

/// Fixed-iteration square root: 20 Newton–Raphson rounds from a `value / 2`
/// seed. Non-positive input returns 0.0.
pub(crate) fn stable_sqrt(value: f32) -> f32 {
    if value <= 0.0 {
        return 0.0;
    }
    let mut guess = value / 2.0;
    for _ in 0..SQRT_ROUNDS {
        guess = 0.5 * (guess + value / guess);
    }
    guess
}

/// Face embedding vector (typically 512-dimensional for ArcFace-style models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity between two embeddings: `dot / (‖a‖·‖b‖)`.
    ///
    /// Returns a value in [-1, 1]. Two sentinel cases both yield `0.0` and
    /// are legitimate results, not failures: vectors of different lengths,
    /// and a zero-norm vector on either side.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = stable_sqrt(norm_a) * stable_sqrt(norm_b);
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// An enrolled face template. Deactivated on re-enrollment or revocation,
/// never hard-deleted; only active templates participate in matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceTemplate {
    pub id: String,
    pub user_id: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}
