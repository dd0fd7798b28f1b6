//! Deterministic stand-ins for the model-backed components.

use std::collections::HashMap;
use std::sync::Mutex;

use image::GrayImage;

use crate::browse::{BrowseState, SessionStore};
use crate::crop::{DetectError, FaceBox, FaceDetector};
use crate::embed::{
    ChannelOrder, EmbedError, EmbedderConfig, FeatureBackbone, FeatureLayer, InputTensor,
    ResizeFilter,
};

/// Small input so tests stay fast: 32x32 through five pools is 512 features.
pub(crate) const TEST_CONFIG: EmbedderConfig = EmbedderConfig {
    input_size: 32,
    resize_filter: ResizeFilter::Triangle,
    channel_order: ChannelOrder::Rgb,
    mean: [127.5, 127.5, 127.5],
    scale: [1.0 / 127.5, 1.0 / 127.5, 1.0 / 127.5],
    layer: FeatureLayer::Block5Pool,
};

/// Averages equal slices of the input into one feature each.
pub(crate) struct ChunkMeanBackbone {
    pub(crate) config: EmbedderConfig,
}

impl ChunkMeanBackbone {
    pub(crate) fn new() -> Self {
        Self {
            config: TEST_CONFIG,
        }
    }
}

impl FeatureBackbone for ChunkMeanBackbone {
    fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, EmbedError> {
        let outputs = self.config.output_len();
        let chunk = (input.data.len() / outputs).max(1);
        Ok(input
            .data
            .chunks(chunk)
            .take(outputs)
            .enumerate()
            .map(|(index, values)| {
                let mean = values.iter().sum::<f32>() / values.len() as f32;
                mean + 1.5 + (index % 7) as f32 * 0.01
            })
            .collect())
    }
}

/// Always returns the same output, regardless of input.
pub(crate) struct ConstantBackbone {
    pub(crate) output: Vec<f32>,
}

impl FeatureBackbone for ConstantBackbone {
    fn config(&self) -> &EmbedderConfig {
        &TEST_CONFIG
    }

    fn forward(&self, _input: &InputTensor) -> Result<Vec<f32>, EmbedError> {
        Ok(self.output.clone())
    }
}

pub(crate) struct FixedDetector {
    pub(crate) boxes: Vec<FaceBox>,
}

impl FaceDetector for FixedDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceBox>, DetectError> {
        Ok(self.boxes.clone())
    }
}

/// Unbounded in-memory session store.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    sessions: Mutex<HashMap<String, BrowseState>>,
}

impl SessionStore for MemorySessionStore {
    fn get(&self, token: &str) -> Option<BrowseState> {
        self.sessions
            .lock()
            .expect("session lock must not be poisoned")
            .get(token)
            .cloned()
    }

    fn put(&self, token: &str, state: BrowseState) {
        self.sessions
            .lock()
            .expect("session lock must not be poisoned")
            .insert(token.to_string(), state);
    }
}
