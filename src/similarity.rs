//! Speaker embeddings and cosine similarity

use crate::error::SimilarityError;
use serde::Serialize;

/// A fixed-length voice-print vector produced by a speaker model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.vector
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// Euclidean norm
    pub fn norm(&self) -> f32 {
        l2_norm(&self.vector)
    }

    /// Cosine similarity against another embedding
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        cosine_similarity(&self.vector, &other.vector)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(vector: Vec<f32>) -> Self {
        Self::new(vector)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of two vectors, clamped to [-1, 1]
///
/// Both inputs are L2-normalized first. Empty, non-finite or zero-norm
/// vectors are rejected rather than scored as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() || a.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return Err(SimilarityError::DegenerateVector);
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return Err(SimilarityError::DegenerateVector);
    }

    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x / norm_a) * (y / norm_b))
        .sum();

    Ok(dot.clamp(-1.0, 1.0))
}
