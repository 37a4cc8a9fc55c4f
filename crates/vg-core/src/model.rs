//! Boundary between the orchestration code and whatever runs the networks.

use image::RgbImage;
use crate::condition::Condition;
use crate::error::Result;
use crate::latent::LatentTensor;
use crate::model_types::{ComputeDevice, Precision};
use crate::rng::SeededGenerator;

/// Whether a generation call carries classifier-free guidance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuidanceMode {
    /// Distilled models take no guidance argument at all
    Unguided,
    ClassifierFree { scale: f32 },
}

impl GuidanceMode {
    pub fn scale(&self) -> Option<f32> {
        match self {
            Self::Unguided => None,
            Self::ClassifierFree { scale } => Some(*scale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Latent,
    Pixels,
}

/// Starting point for a partial re-noise pass
#[derive(Debug)]
pub struct RefineInput {
    pub latents: LatentTensor,
    pub denoise_strength: f32,
    pub decode_timestep: f32,
    pub image_cond_noise_scale: f32,
}

/// One call into the base generator
#[derive(Debug)]
pub struct GenerationCall<'a> {
    pub conditions: &'a [Condition],
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub steps: u32,
    pub guidance: GuidanceMode,
    /// `None` starts from pure noise
    pub refine: Option<RefineInput>,
    pub output: OutputFormat,
}

#[derive(Debug)]
pub enum GenerationOutput {
    Latent(LatentTensor),
    Frames(Vec<RgbImage>),
}

impl GenerationOutput {
    pub fn kind(&self) -> OutputFormat {
        match self {
            Self::Latent(_) => OutputFormat::Latent,
            Self::Frames(_) => OutputFormat::Pixels,
        }
    }
}

/// Placement and memory controls common to every loaded model
pub trait ModelHandle: Send + Sync {
    fn model_id(&self) -> &str;

    /// Keep the whole graph on `device`
    fn to_device(&mut self, device: ComputeDevice) -> Result<()>;

    fn enable_model_offload(&mut self) -> Result<()>;

    fn enable_sequential_offload(&mut self) -> Result<()>;

    /// Tiled decoding in the image decoder
    fn enable_tiling(&mut self) -> Result<()>;

    fn enable_attention_slicing(&mut self, granularity: usize) -> Result<()>;

    /// Drop cached accelerator allocations
    fn release_cached_memory(&self) -> Result<()>;
}

/// Base generative model
pub trait VideoGenerator: ModelHandle {
    /// Pixel-to-latent downsampling factor of the decoder
    fn spatial_compression_ratio(&self) -> u32 {
        32
    }

    fn generate(
        &self,
        call: GenerationCall<'_>,
        generator: &mut SeededGenerator,
    ) -> Result<GenerationOutput>;
}

/// Doubles the spatial size of a latent without decoding it
pub trait LatentUpsampler: ModelHandle {
    fn upsample(&self, latents: LatentTensor) -> Result<LatentTensor>;
}

/// Loads model weights by identifier
pub trait ModelProvider {
    fn load_generator(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn VideoGenerator>>;

    fn load_upsampler(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn LatentUpsampler>>;
}
