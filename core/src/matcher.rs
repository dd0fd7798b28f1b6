//! Exhaustive cosine ranking over a [`SimilarityIndex`].

use std::error::Error;
use std::fmt;

use serde::Serialize;

use crate::index::SimilarityIndex;
use crate::vector::{first_non_finite, PreparedCosineQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    /// The query does not have the index's fixed vector length, or holds
    /// non-finite values.
    InvalidInput { expected: usize, got: usize },
    NonFiniteQuery { index: usize },
    /// `best` was asked for on an empty index.
    NoMatches,
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { expected, got } => write!(
                f,
                "invalid query dimension: expected {expected}, got {got}"
            ),
            Self::NonFiniteQuery { index } => {
                write!(f, "query contains non-finite value at index {index}")
            }
            Self::NoMatches => write!(f, "the similarity index is empty"),
        }
    }
}

impl Error for MatchError {}

/// One catalog entry with its distance to the query; lower is more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub identifier: String,
    pub distance: f32,
}

/// Ranks every catalog entry by ascending cosine distance to `query`.
///
/// Equal distances keep index order (identifier order). An empty index yields
/// an empty ranking.
pub fn rank(query: &[f32], index: &SimilarityIndex) -> Result<Vec<RankedMatch>, MatchError> {
    let prepared = prepare(query, index)?;

    let mut ranked: Vec<RankedMatch> = index
        .iter()
        .map(|(identifier, values)| RankedMatch {
            identifier: identifier.to_string(),
            // stored vectors are never zero-norm; treat a zero query as orthogonal
            distance: prepared.cosine_distance_unchecked(values).unwrap_or(1.0),
        })
        .collect();
    ranked.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    Ok(ranked)
}

/// Returns the single closest entry.
pub fn best(query: &[f32], index: &SimilarityIndex) -> Result<RankedMatch, MatchError> {
    rank(query, index)?
        .into_iter()
        .next()
        .ok_or(MatchError::NoMatches)
}

fn prepare(query: &[f32], index: &SimilarityIndex) -> Result<PreparedCosineQuery, MatchError> {
    if query.len() != index.dimension() {
        return Err(MatchError::InvalidInput {
            expected: index.dimension(),
            got: query.len(),
        });
    }
    if let Some((position, _)) = first_non_finite(query) {
        return Err(MatchError::NonFiniteQuery { index: position });
    }
    Ok(PreparedCosineQuery::new(query))
}

#[cfg(test)]
mod tests;
