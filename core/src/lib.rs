#![forbid(unsafe_code)]
//! Core pipeline for Lookalike.
//!
//! Matches a portrait to the most similar-looking catalog photo: crop the
//! subject, embed it with a frozen convolutional network, rank the catalog
//! by cosine distance, then browse the ranking one entry at a time.

pub mod browse;
pub mod category;
pub mod crop;
pub mod embed;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod vector;

#[cfg(test)]
pub(crate) mod testing;

pub use browse::{
    BrowseCatalog, BrowseError, BrowseOrigin, BrowseState, BrowseStep, NextOutcome, NextStatus,
    SessionStore,
};
pub use category::{category_of, UNKNOWN_CATEGORY};
pub use crop::{
    decode_image, extract_center_square, extract_center_square_from_path, extract_face,
    extract_face_from_bytes, Crop, DetectError, FaceBox, FaceDetector,
};
pub use embed::{
    preprocess, ChannelOrder, EmbedError, Embedder, EmbedderConfig, Embedding, FeatureBackbone,
    FeatureLayer, InputTensor, ResizeFilter,
};
pub use index::{IndexBuilder, IndexError, SimilarityIndex};
pub use matcher::{best, rank, MatchError, RankedMatch};
pub use pipeline::{embed_catalog_image, MatchOutcome, Pipeline, PipelineError};
pub use vector::{cosine_distance, dot_product, l2_norm, normalize_l2, VectorError};
