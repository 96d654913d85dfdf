//! Cosine similarity matching between embeddings and against a reference store.

use crate::types::{Embedding, MatchResult, ReferenceRecord};
use thiserror::Error;

/// Default cosine similarity threshold for a positive match.
pub const DEFAULT_THRESHOLD: f32 = 0.30;
const SCORE_DECIMALS: i32 = 4;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding dimensions differ ({0} vs {1})")]
    DimensionMismatch(usize, usize),
    #[error("embeddings come from different models ({0} vs {1})")]
    ModelMismatch(String, String),
}

/// How a query is resolved against a multi-record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePolicy {
    /// Walk the store in order; the first record clearing the threshold wins.
    #[default]
    FirstOverThreshold,
    /// Compare every record; the best one wins if it clears the threshold.
    BestOverall,
}

impl StorePolicy {
    /// Name accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            StorePolicy::FirstOverThreshold => "first",
            StorePolicy::BestOverall => "best",
        }
    }
}

impl std::str::FromStr for StorePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(StorePolicy::FirstOverThreshold),
            "best" => Ok(StorePolicy::BestOverall),
            other => Err(format!("unknown store policy '{other}' (expected first|best)")),
        }
    }
}

fn round_score(score: f64) -> f64 {
    let factor = 10f64.powi(SCORE_DECIMALS);
    (score * factor).round() / factor
}

/// Thresholds are compared at the same precision as reported scores.
fn threshold_f64(threshold: f32) -> f64 {
    round_score(f64::from(threshold))
}

/// Cosine similarity in [-1, 1], accumulated in f64.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f64, MatchError> {
    if let (Some(ma), Some(mb)) = (&a.model_version, &b.model_version) {
        if ma != mb {
            return Err(MatchError::ModelMismatch(ma.clone(), mb.clone()));
        }
    }
    if a.dim() != b.dim() {
        return Err(MatchError::DimensionMismatch(a.dim(), b.dim()));
    }

    let denom = a.norm() * b.norm();
    if denom == 0.0 || !denom.is_finite() {
        return Err(MatchError::ZeroNorm);
    }

    let dot: f64 = a
        .values
        .iter()
        .zip(b.values.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Compare two embeddings. The decision is taken on the reported (rounded) score.
pub fn compare(a: &Embedding, b: &Embedding, threshold: f32) -> Result<MatchResult, MatchError> {
    let score = round_score(cosine_similarity(a, b)?);
    Ok(MatchResult::decided(score >= threshold_f64(threshold), score, None))
}

/// Resolve a query against store records.
///
/// An empty store or a store with no record over the threshold is a
/// non-match, never an error. Non-matches report the best score seen.
pub fn match_store(
    query: &Embedding,
    records: &[ReferenceRecord],
    threshold: f32,
    policy: StorePolicy,
) -> Result<MatchResult, MatchError> {
    let mut best: Option<(f64, &ReferenceRecord)> = None;

    for record in records {
        let result = compare(query, &record.embedding, threshold)?;
        tracing::trace!(id = %record.id, score = result.score, "compared reference");

        if result.matched && policy == StorePolicy::FirstOverThreshold {
            return Ok(MatchResult::decided(true, result.score, Some(record.id.clone())));
        }
        if best.map_or(true, |(score, _)| result.score > score) {
            best = Some((result.score, record));
        }
    }

    Ok(match best {
        Some((score, record)) if score >= threshold_f64(threshold) => {
            MatchResult::decided(true, score, Some(record.id.clone()))
        }
        Some((score, _)) => MatchResult::decided(false, score, None),
        None => MatchResult::decided(false, 0.0, None),
    })
}
