use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use crate::embed::{EmbedderConfig, Embedding};
use crate::vector::{first_non_finite, l2_norm, UNIT_NORM_TOLERANCE};

mod snapshot;

#[derive(Debug)]
pub enum IndexError {
    Missing(PathBuf),
    Io(std::io::Error),
    Serde(serde_json::Error),
    UnsupportedVersion(u32),
    ChecksumMismatch { stored: u32, computed: u32 },
    InvalidData(String),
    EmptyIdentifier,
    DuplicateIdentifier(String),
    InconsistentDimension {
        identifier: String,
        expected: usize,
        got: usize,
    },
    NonFinite { identifier: String, index: usize },
    NotNormalized { identifier: String, norm: f32 },
    EmbedderMismatch {
        index: EmbedderConfig,
        runtime: EmbedderConfig,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "index file {} does not exist", path.display()),
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::UnsupportedVersion(version) => write!(f, "unsupported index version {version}"),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "index checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            Self::InvalidData(message) => write!(f, "invalid index data: {message}"),
            Self::EmptyIdentifier => write!(f, "catalog identifiers must not be empty"),
            Self::DuplicateIdentifier(identifier) => {
                write!(f, "duplicate catalog identifier '{identifier}'")
            }
            Self::InconsistentDimension {
                identifier,
                expected,
                got,
            } => write!(
                f,
                "vector for '{identifier}' has dimension {got}, expected {expected}"
            ),
            Self::NonFinite { identifier, index } => write!(
                f,
                "vector for '{identifier}' has a non-finite value at index {index}"
            ),
            Self::NotNormalized { identifier, norm } => write!(
                f,
                "vector for '{identifier}' is not unit-normalized (norm {norm})"
            ),
            Self::EmbedderMismatch { index, runtime } => write!(
                f,
                "index was built with embedder {index:?} but the runtime embedder is {runtime:?}; rebuild the index"
            ),
        }
    }
}

impl Error for IndexError {}

impl From<std::io::Error> for IndexError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Immutable mapping from catalog identifier to unit-length embedding.
///
/// Entries are kept in identifier order, which is also the tie-break order
/// for equal distances.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    embedder: EmbedderConfig,
    dimension: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

impl SimilarityIndex {
    pub fn embedder(&self) -> &EmbedderConfig {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&[f32]> {
        self.entries.get(identifier).map(Vec::as_slice)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.entries
            .iter()
            .map(|(identifier, values)| (identifier.as_str(), values.as_slice()))
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Fails unless the index was built with exactly `runtime`.
    pub fn ensure_embedder(&self, runtime: &EmbedderConfig) -> Result<(), IndexError> {
        if self.embedder != *runtime {
            return Err(IndexError::EmbedderMismatch {
                index: self.embedder,
                runtime: *runtime,
            });
        }
        Ok(())
    }
}

/// Accumulates catalog entries for a new index.
#[derive(Debug)]
pub struct IndexBuilder {
    index: SimilarityIndex,
}

impl IndexBuilder {
    pub fn new(embedder: EmbedderConfig) -> Self {
        Self {
            index: SimilarityIndex {
                embedder,
                dimension: embedder.output_len(),
                entries: BTreeMap::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn insert(
        &mut self,
        identifier: impl Into<String>,
        embedding: Embedding,
    ) -> Result<(), IndexError> {
        self.insert_values(identifier, embedding.into_vec())
    }

    /// Inserts raw values, checking every invariant an [`Embedding`] carries.
    pub fn insert_values(
        &mut self,
        identifier: impl Into<String>,
        values: Vec<f32>,
    ) -> Result<(), IndexError> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(IndexError::EmptyIdentifier);
        }
        if self.index.entries.contains_key(&identifier) {
            return Err(IndexError::DuplicateIdentifier(identifier));
        }
        validate_values(&identifier, &values, self.index.dimension)?;

        self.index.entries.insert(identifier, values);
        Ok(())
    }

    pub fn finish(self) -> SimilarityIndex {
        self.index
    }
}

fn validate_values(identifier: &str, values: &[f32], dimension: usize) -> Result<(), IndexError> {
    if values.len() != dimension {
        return Err(IndexError::InconsistentDimension {
            identifier: identifier.to_string(),
            expected: dimension,
            got: values.len(),
        });
    }
    if let Some((index, _)) = first_non_finite(values) {
        return Err(IndexError::NonFinite {
            identifier: identifier.to_string(),
            index,
        });
    }

    let norm = l2_norm(values);
    if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
        return Err(IndexError::NotNormalized {
            identifier: identifier.to_string(),
            norm,
        });
    }
    Ok(())
}
