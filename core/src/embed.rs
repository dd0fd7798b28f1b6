//! Image → embedding contract.
//!
//! The network is a black box behind [`FeatureBackbone`]; everything around
//! it (resize, channel forcing, normalization, flatten, L2) lives here so the
//! offline indexer and the online query path run the exact same steps.

use std::error::Error;
use std::fmt;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::crop::Crop;
use crate::vector::{normalize_l2, VectorError};

/// Channel layout of the network input planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Pooling stage of a VGG-style network whose output is used as the feature
/// map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayer {
    Block3Pool,
    Block4Pool,
    Block5Pool,
}

impl FeatureLayer {
    /// Number of 2x2 max-pool stages up to and including this layer.
    pub fn pool_stages(self) -> u32 {
        match self {
            Self::Block3Pool => 3,
            Self::Block4Pool => 4,
            Self::Block5Pool => 5,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            Self::Block3Pool => 256,
            Self::Block4Pool | Self::Block5Pool => 512,
        }
    }

    /// Flattened feature length for a square input of side `input_size`.
    pub fn output_len(self, input_size: u32) -> usize {
        let side = (input_size >> self.pool_stages()) as usize;
        self.channels() * side * side
    }
}

/// Every knob that changes what vector an image maps to.
///
/// The indexer writes this into the index blob and the server refuses an
/// index built with a different value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub input_size: u32,
    pub resize_filter: ResizeFilter,
    pub channel_order: ChannelOrder,
    /// Per-plane mean, in `channel_order`, on the 0..=255 pixel scale.
    pub mean: [f32; 3],
    /// Per-plane multiplier applied after mean subtraction.
    pub scale: [f32; 3],
    pub layer: FeatureLayer,
}

impl EmbedderConfig {
    /// ImageNet VGG16 with torchvision preprocessing, features from
    /// `block5_pool`.
    ///
    /// torchvision normalizes RGB input in `0..=1` by mean
    /// `[0.485, 0.456, 0.406]` and std `[0.229, 0.224, 0.225]`; both are
    /// rescaled here to the 0..=255 pixel scale.
    pub const VGG16_BLOCK5_POOL: Self = Self {
        input_size: 224,
        resize_filter: ResizeFilter::CatmullRom,
        channel_order: ChannelOrder::Rgb,
        mean: [123.675, 116.28, 103.53],
        scale: [1.0 / 58.395, 1.0 / 57.12, 1.0 / 57.375],
        layer: FeatureLayer::Block5Pool,
    };

    pub fn output_len(&self) -> usize {
        self.layer.output_len(self.input_size)
    }

    pub fn validate(&self) -> Result<(), EmbedError> {
        if self.input_size == 0 || self.output_len() == 0 {
            return Err(EmbedError::InvalidConfig(format!(
                "input size {} is too small for {:?}",
                self.input_size, self.layer
            )));
        }
        if self
            .mean
            .iter()
            .chain(self.scale.iter())
            .any(|value| !value.is_finite())
        {
            return Err(EmbedError::InvalidConfig(
                "normalization constants must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::VGG16_BLOCK5_POOL
    }
}

/// Planar `[channels, height, width]` network input for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub data: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

/// A unit-length feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// L2-normalizes `values` into an embedding.
    pub fn new(mut values: Vec<f32>) -> Result<Self, VectorError> {
        normalize_l2(&mut values)?;
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// No crop reached the embedder.
    MissingCrop,
    InvalidConfig(String),
    Backend(String),
    OutputShape { expected: usize, got: usize },
    /// The network produced a vector that cannot be normalized.
    Degenerate(VectorError),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCrop => write!(f, "no crop to embed"),
            Self::InvalidConfig(message) => write!(f, "invalid embedder config: {message}"),
            Self::Backend(message) => write!(f, "feature backbone failed: {message}"),
            Self::OutputShape { expected, got } => write!(
                f,
                "feature length mismatch: expected {expected}, got {got}"
            ),
            Self::Degenerate(error) => write!(f, "degenerate feature vector: {error}"),
        }
    }
}

impl Error for EmbedError {}

impl From<VectorError> for EmbedError {
    fn from(value: VectorError) -> Self {
        Self::Degenerate(value)
    }
}

/// A frozen, deterministic feature extractor.
///
/// Implementations may serialize calls internally when the underlying
/// inference runtime is not reentrant.
pub trait FeatureBackbone: Send + Sync {
    fn config(&self) -> &EmbedderConfig;

    /// Runs the network and returns the flattened feature maps.
    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, EmbedError>;
}

/// Resizes, forces three channels and normalizes a crop for the network.
pub fn preprocess(crop: &Crop, config: &EmbedderConfig) -> InputTensor {
    let side = config.input_size;
    let resized = crop
        .image()
        .resize_exact(side, side, config.resize_filter.filter_type());
    // grayscale is replicated, alpha is dropped
    let rgb = resized.to_rgb8();

    let side = side as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; 3 * plane];
    for (index, pixel) in rgb.pixels().enumerate() {
        let [red, green, blue] = pixel.0;
        let ordered = match config.channel_order {
            ChannelOrder::Rgb => [red, green, blue],
            ChannelOrder::Bgr => [blue, green, red],
        };
        for (channel, value) in ordered.into_iter().enumerate() {
            data[channel * plane + index] =
                (f32::from(value) - config.mean[channel]) * config.scale[channel];
        }
    }

    InputTensor {
        data,
        channels: 3,
        height: side,
        width: side,
    }
}

/// Turns crops into embeddings with a single shared backbone.
pub struct Embedder {
    backbone: Box<dyn FeatureBackbone>,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("config", self.backbone.config())
            .finish()
    }
}

impl Embedder {
    pub fn new(backbone: Box<dyn FeatureBackbone>) -> Result<Self, EmbedError> {
        backbone.config().validate()?;
        Ok(Self { backbone })
    }

    pub fn config(&self) -> &EmbedderConfig {
        self.backbone.config()
    }

    /// Length of every vector this embedder produces.
    pub fn dimension(&self) -> usize {
        self.config().output_len()
    }

    /// Embeds a crop; an absent crop fails with [`EmbedError::MissingCrop`].
    pub fn embed(&self, crop: Option<&Crop>) -> Result<Embedding, EmbedError> {
        let crop = crop.ok_or(EmbedError::MissingCrop)?;
        let input = preprocess(crop, self.config());
        let features = self.backbone.forward(&input)?;

        let expected = self.dimension();
        if features.len() != expected {
            return Err(EmbedError::OutputShape {
                expected,
                got: features.len(),
            });
        }
        Ok(Embedding::new(features)?)
    }
}
