//! VGG16 convolutional base on candle, cut at a fixed pooling layer.
//!
//! Weights are read from a safetensors file using torchvision's naming
//! (`features.{N}.weight`, `features.{N}.bias`, OIHW kernels). Only the
//! convolutional blocks up to the configured pooling layer are loaded; the
//! classifier head is never built.
//!
//! torchvision weights expect torchvision input normalization, which is
//! what `EmbedderConfig::VGG16_BLOCK5_POOL` describes.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use lookalike_core::{EmbedError, EmbedderConfig, FeatureBackbone, InputTensor};

/// Output channels of each conv layer, grouped by block.
const VGG16_BLOCKS: [&[usize]; 5] = [
    &[64, 64],
    &[128, 128],
    &[256, 256, 256],
    &[512, 512, 512],
    &[512, 512, 512],
];

pub struct Vgg16Features {
    config: EmbedderConfig,
    device: Device,
    blocks: Vec<Vec<Conv2d>>,
}

impl std::fmt::Debug for Vgg16Features {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vgg16Features")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

fn backend(error: candle_core::Error) -> EmbedError {
    EmbedError::Backend(error.to_string())
}

impl Vgg16Features {
    /// Loads frozen weights from `weights` onto `device`.
    pub fn load(
        weights: &Path,
        config: EmbedderConfig,
        device: Device,
    ) -> Result<Self, EmbedError> {
        let tensors = candle_core::safetensors::load(weights, &device).map_err(|error| {
            EmbedError::Backend(format!(
                "failed to read weights {}: {error}",
                weights.display()
            ))
        })?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        Self::from_var_builder(vb, config)
    }

    pub fn from_var_builder(vb: VarBuilder, config: EmbedderConfig) -> Result<Self, EmbedError> {
        config.validate()?;
        let device = vb.device().clone();
        let conv_config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut blocks = Vec::new();
        let mut in_channels = 3;
        // torchvision numbers conv, relu and pool modules in one sequence
        let mut module_index = 0usize;
        let stages = config.layer.pool_stages() as usize;
        for widths in VGG16_BLOCKS.iter().take(stages) {
            let mut convs = Vec::with_capacity(widths.len());
            for &out_channels in widths.iter() {
                let conv = candle_nn::conv2d(
                    in_channels,
                    out_channels,
                    3,
                    conv_config,
                    vb.pp(format!("features.{module_index}")),
                )
                .map_err(backend)?;
                convs.push(conv);
                in_channels = out_channels;
                module_index += 2;
            }
            module_index += 1;
            blocks.push(convs);
        }

        tracing::debug!(
            layer = ?config.layer,
            blocks = blocks.len(),
            output_len = config.output_len(),
            "vgg16 feature extractor ready"
        );
        Ok(Self {
            config,
            device,
            blocks,
        })
    }

    fn run(&self, input: &InputTensor) -> candle_core::Result<Vec<f32>> {
        let mut xs = Tensor::from_slice(
            &input.data,
            (1, input.channels, input.height, input.width),
            &self.device,
        )?;
        for block in &self.blocks {
            for conv in block {
                xs = conv.forward(&xs)?.relu()?;
            }
            xs = xs.max_pool2d(2)?;
        }
        // flatten channels-last so vectors match NHWC exports of the same net
        xs.permute((0, 2, 3, 1))?
            .contiguous()?
            .flatten_all()?
            .to_vec1::<f32>()
    }
}

impl FeatureBackbone for Vgg16Features {
    fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, EmbedError> {
        self.run(input).map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use candle_nn::VarMap;
    use lookalike_core::{Crop, Embedder, FeatureLayer};

    use super::*;

    const SMALL_CONFIG: EmbedderConfig = EmbedderConfig {
        input_size: 32,
        ..EmbedderConfig::VGG16_BLOCK5_POOL
    };

    fn random_backbone(varmap: &VarMap, config: EmbedderConfig) -> Vgg16Features {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Vgg16Features::from_var_builder(vb, config).expect("backbone must build")
    }

    fn test_crop() -> Crop {
        Crop::from_image(image::DynamicImage::ImageRgb8(image::ImageBuffer::from_fn(
            40,
            40,
            |x, y| image::Rgb([(x * 6) as u8, (y * 6) as u8, ((x + y) * 3) as u8]),
        )))
    }

    #[test]
    fn weights_follow_torchvision_names() {
        let varmap = VarMap::new();
        let _backbone = random_backbone(&varmap, SMALL_CONFIG);

        let data = varmap
            .data()
            .lock()
            .expect("varmap lock must not be poisoned");
        assert_eq!(data.len(), 26);
        for index in [0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28] {
            assert!(data.contains_key(&format!("features.{index}.weight")));
            assert!(data.contains_key(&format!("features.{index}.bias")));
        }
    }

    #[test]
    fn shallower_layer_loads_fewer_blocks() {
        let varmap = VarMap::new();
        let config = EmbedderConfig {
            layer: FeatureLayer::Block4Pool,
            ..SMALL_CONFIG
        };
        let _backbone = random_backbone(&varmap, config);

        let data = varmap
            .data()
            .lock()
            .expect("varmap lock must not be poisoned");
        assert!(data.contains_key("features.21.weight"));
        assert!(!data.contains_key("features.24.weight"));
    }

    #[test]
    fn embedding_has_configured_length_and_unit_norm() {
        let varmap = VarMap::new();
        let backbone = random_backbone(&varmap, SMALL_CONFIG);
        let embedder = Embedder::new(Box::new(backbone)).expect("embedder must build");

        let crop = test_crop();
        let first = embedder.embed(Some(&crop)).expect("embed must succeed");
        assert_eq!(first.len(), 512);
        assert!((lookalike_core::l2_norm(first.as_slice()) - 1.0).abs() < 1e-5);

        let second = embedder.embed(Some(&crop)).expect("embed must succeed");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_weights_file_fails() {
        let path = std::env::temp_dir().join("lookalike_missing_vgg16.safetensors");
        let error = Vgg16Features::load(&path, SMALL_CONFIG, Device::Cpu).expect_err("must fail");
        assert!(matches!(error, EmbedError::Backend(_)));
    }
}
