//! Facial embedding representation and single-sample matching.
//!
//! Two embedding shapes coexist in stored records: the 128/129-component
//! vectors produced by the landmark-based recognizer, compared by Euclidean
//! distance, and arbitrary-length fingerprints (e.g. the 768-component pixel
//! fallback), compared by cosine similarity. The comparison algorithm is
//! fixed at ingestion from the record shape and carried as a tag — never
//! re-inferred downstream.

use thiserror::Error;

/// Components used by the metric (Euclidean) comparison path.
pub const METRIC_DIM: usize = 128;

/// Fixed distance ceiling for the legacy single-embedding path.
const LEGACY_DISTANCE_THRESHOLD: f32 = 0.6;

/// Cosine similarity floor for non-metric shapes.
const COSINE_SIMILARITY_THRESHOLD: f32 = 0.9;

/// Guard against division by zero on degenerate vectors.
pub(crate) const NORM_EPSILON: f32 = 1e-6;

/// Comparison algorithm, assigned when an embedding enters the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    /// Euclidean distance over the first [`METRIC_DIM`] components.
    Metric128,
    /// Cosine similarity over the full vector.
    Cosine,
}

/// A facial feature vector plus the algorithm it is compared with.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
    kind: EmbeddingKind,
}

impl Embedding {
    /// Ingest a float vector, tagging it from its shape: 128 or 129
    /// components means the metric recognizer produced it, anything else
    /// is a fingerprint compared by cosine similarity.
    pub fn from_values(values: Vec<f32>) -> Self {
        let kind = match values.len() {
            128 | 129 => EmbeddingKind::Metric128,
            _ => EmbeddingKind::Cosine,
        };
        Self { values, kind }
    }

    /// Decode a raw little-endian f32 buffer, the storage format that
    /// predates sample collections. Trailing bytes that do not complete a
    /// float are ignored.
    pub fn from_legacy_bytes(bytes: &[u8]) -> Self {
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_values(values)
    }

    /// Serialize to the raw little-endian f32 buffer format.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn kind(&self) -> EmbeddingKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Faults a comparison can run into. These stay internal: the matcher
/// boundary collapses them to a non-match after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchFault {
    #[error("empty embedding")]
    Empty,
    #[error("embedding too short for metric comparison: {0} components")]
    TooShort(usize),
    #[error("embedding length mismatch: {stored} stored vs {live} live")]
    DimensionMismatch { stored: usize, live: usize },
    #[error("comparison produced a non-finite value")]
    NonFinite,
}

/// Euclidean distance over the first [`METRIC_DIM`] components of each side.
pub(crate) fn euclidean_128(stored: &[f32], live: &[f32]) -> Result<f32, MatchFault> {
    if stored.is_empty() || live.is_empty() {
        return Err(MatchFault::Empty);
    }
    if stored.len() < METRIC_DIM {
        return Err(MatchFault::TooShort(stored.len()));
    }
    if live.len() < METRIC_DIM {
        return Err(MatchFault::TooShort(live.len()));
    }

    let mut sum = 0.0f32;
    for (s, l) in stored[..METRIC_DIM].iter().zip(&live[..METRIC_DIM]) {
        let d = s - l;
        sum += d * d;
    }

    let dist = sum.sqrt();
    if dist.is_finite() {
        Ok(dist)
    } else {
        Err(MatchFault::NonFinite)
    }
}

/// Cosine similarity over full vectors, with an epsilon guard in the
/// denominator so a zero vector scores 0 rather than dividing by zero.
pub(crate) fn cosine_similarity(stored: &[f32], live: &[f32]) -> Result<f32, MatchFault> {
    if stored.is_empty() || live.is_empty() {
        return Err(MatchFault::Empty);
    }
    if stored.len() != live.len() {
        return Err(MatchFault::DimensionMismatch {
            stored: stored.len(),
            live: live.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_stored = 0.0f32;
    let mut norm_live = 0.0f32;
    for (s, l) in stored.iter().zip(live.iter()) {
        dot += s * l;
        norm_stored += s * s;
        norm_live += l * l;
    }

    let sim = dot / (norm_stored.sqrt() * norm_live.sqrt() + NORM_EPSILON);
    if sim.is_finite() {
        Ok(sim)
    } else {
        Err(MatchFault::NonFinite)
    }
}

/// Compare one stored embedding against a live capture.
///
/// The stored side's tag selects the algorithm. Faults (empty or degenerate
/// vectors, shape mismatches) are logged and collapsed to a non-match; this
/// function never errors.
pub fn embedding_matches(stored: &Embedding, live: &Embedding) -> bool {
    match try_match(stored, live) {
        Ok(matched) => matched,
        Err(fault) => {
            tracing::debug!(%fault, "embedding comparison fault treated as non-match");
            false
        }
    }
}

fn try_match(stored: &Embedding, live: &Embedding) -> Result<bool, MatchFault> {
    match stored.kind {
        EmbeddingKind::Metric128 => {
            let dist = euclidean_128(stored.values(), live.values())?;
            Ok(dist < LEGACY_DISTANCE_THRESHOLD)
        }
        EmbeddingKind::Cosine => {
            let sim = cosine_similarity(stored.values(), live.values())?;
            Ok(sim > COSINE_SIMILARITY_THRESHOLD)
        }
    }
}
