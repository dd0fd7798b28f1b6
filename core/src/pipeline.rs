//! Extract → embed → rank, with every model-backed piece injected.

use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::category::category_of;
use crate::crop::{
    extract_center_square_from_path, extract_face_from_bytes, DetectError, FaceDetector,
};
use crate::embed::{EmbedError, Embedder, Embedding};
use crate::index::{IndexError, SimilarityIndex};
use crate::matcher::{rank, MatchError, RankedMatch};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// No face was found, or the image could not be read.
    CropFailure,
    /// The detector itself failed; no verdict about the image exists.
    Detection(DetectError),
    EmbeddingFailure(EmbedError),
    Match(MatchError),
}

impl PipelineError {
    /// True for conditions the user can fix by trying another image.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(self, Self::CropFailure | Self::EmbeddingFailure(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CropFailure => write!(f, "no face found in the image"),
            Self::Detection(error) => write!(f, "face detection failed: {error}"),
            Self::EmbeddingFailure(error) => write!(f, "embedding failed: {error}"),
            Self::Match(error) => write!(f, "matching failed: {error}"),
        }
    }
}

impl Error for PipelineError {}

impl From<DetectError> for PipelineError {
    fn from(value: DetectError) -> Self {
        Self::Detection(value)
    }
}

impl From<EmbedError> for PipelineError {
    fn from(value: EmbedError) -> Self {
        Self::EmbeddingFailure(value)
    }
}

impl From<MatchError> for PipelineError {
    fn from(value: MatchError) -> Self {
        Self::Match(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub best: RankedMatch,
    pub category: String,
    /// Full ranking, best first.
    pub ranked: Vec<RankedMatch>,
}

/// The online query path over a shared, read-only index.
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<Embedder>,
    index: Arc<SimilarityIndex>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("embedder", &self.embedder)
            .field("entries", &self.index.len())
            .finish()
    }
}

impl Pipeline {
    /// Wires the pipeline, refusing an index built with a different embedder
    /// configuration.
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<Embedder>,
        index: Arc<SimilarityIndex>,
    ) -> Result<Self, IndexError> {
        index.ensure_embedder(embedder.config())?;
        Ok(Self {
            detector,
            embedder,
            index,
        })
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Matches an uploaded portrait against the catalog.
    pub fn match_image(&self, bytes: &[u8]) -> Result<MatchOutcome, PipelineError> {
        let crop = extract_face_from_bytes(bytes, self.detector.as_ref())?;
        let Some(crop) = crop else {
            return Err(PipelineError::CropFailure);
        };
        let embedding = self.embedder.embed(Some(&crop))?;

        let ranked = rank(embedding.as_slice(), &self.index)?;
        let best = ranked
            .first()
            .cloned()
            .ok_or(PipelineError::Match(MatchError::NoMatches))?;
        let category = category_of(&best.identifier);
        tracing::debug!(
            identifier = %best.identifier,
            distance = best.distance,
            %category,
            "best match"
        );

        Ok(MatchOutcome {
            best,
            category,
            ranked,
        })
    }
}

/// Embeds one catalog image the way the offline index build does.
pub fn embed_catalog_image(embedder: &Embedder, path: &Path) -> Result<Embedding, PipelineError> {
    let crop = extract_center_square_from_path(path).ok_or(PipelineError::CropFailure)?;
    Ok(embedder.embed(Some(&crop))?)
}
