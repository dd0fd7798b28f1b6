#![forbid(unsafe_code)]
//! Model-backed implementations of the lookalike-core seams: a candle VGG16
//! feature extractor and a SeetaFace frontal face detector.

pub mod seeta;
pub mod vgg;

pub use seeta::SeetaFaceDetector;
pub use vgg::Vgg16Features;

/// Runs model inference on the CPU.
pub fn cpu_device() -> candle_core::Device {
    candle_core::Device::Cpu
}
