use image::RgbImage;
use serde::{Deserialize, Serialize};
use crate::dimensions::Dimensions;
use crate::error::{Error, Result};

pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "worst quality, inconsistent motion, blurry, jittery, distorted";
pub const DEFAULT_GUIDANCE_SCALE: f32 = 3.2;
/// Largest accepted output side, explicit or via `max_dimension`
pub const MAX_DIMENSION: u32 = 4096;

/// Per-request generation knobs. Model identity is fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    /// Used only when both sides are set
    pub expected_width: Option<u32>,
    pub expected_height: Option<u32>,
    pub max_dimension: u32,
    pub downscale_factor: f64,
    pub num_frames: u32,
    pub steps_lowres: u32,
    pub steps_refine: u32,
    pub denoise_strength: f32,
    pub decode_timestep: f32,
    pub image_cond_noise_scale: f32,
    pub fps: u32,
    pub guidance_scale: Option<f32>,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            expected_width: None,
            expected_height: None,
            max_dimension: 704,
            downscale_factor: 2.0 / 3.0,
            num_frames: 96,
            steps_lowres: 40,
            steps_refine: 15,
            denoise_strength: 0.4,
            decode_timestep: 0.05,
            image_cond_noise_scale: 0.025,
            fps: 30,
            guidance_scale: Some(DEFAULT_GUIDANCE_SCALE),
            seed: 0,
        }
    }
}

impl GenerationParams {
    pub fn explicit_target(&self) -> Option<Dimensions> {
        match (self.expected_width, self.expected_height) {
            (Some(width), Some(height)) => Some(Dimensions::new(width, height)),
            _ => None,
        }
    }

    /// Reject values no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::Input("prompt must not be empty".into()));
        }
        if self.max_dimension == 0 || self.max_dimension > MAX_DIMENSION {
            return Err(Error::Input(format!(
                "max_dimension must be in 1..={MAX_DIMENSION}, got {}",
                self.max_dimension
            )));
        }
        for (name, value) in [
            ("expected_width", self.expected_width),
            ("expected_height", self.expected_height),
        ] {
            if let Some(value) = value.filter(|v| *v > MAX_DIMENSION) {
                return Err(Error::Input(format!(
                    "{name} must be at most {MAX_DIMENSION}, got {value}"
                )));
            }
        }
        if !(self.downscale_factor > 0.0 && self.downscale_factor <= 1.0) {
            return Err(Error::Input(format!(
                "downscale_factor must be in (0, 1], got {}",
                self.downscale_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.denoise_strength) {
            return Err(Error::Input(format!(
                "denoise_strength must be in [0, 1], got {}",
                self.denoise_strength
            )));
        }
        if self.num_frames == 0 {
            return Err(Error::Input("num_frames must be positive".into()));
        }
        if self.steps_lowres == 0 || self.steps_refine == 0 {
            return Err(Error::Input("step counts must be positive".into()));
        }
        if self.fps == 0 {
            return Err(Error::Input("fps must be positive".into()));
        }
        if self.decode_timestep < 0.0 || self.image_cond_noise_scale < 0.0 {
            return Err(Error::Input(
                "decode_timestep and image_cond_noise_scale must not be negative".into(),
            ));
        }
        if let Some(scale) = self.guidance_scale {
            if !scale.is_finite() || scale < 0.0 {
                return Err(Error::Input(format!("invalid guidance_scale {scale}")));
            }
        }
        Ok(())
    }
}

/// Source image plus the knobs for one generation
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: RgbImage,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(image: RgbImage, params: GenerationParams) -> Self {
        Self { image, params }
    }

    /// Decode an uploaded image. Runs before any model call.
    pub fn from_encoded(bytes: &[u8], params: GenerationParams) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::Input(format!("could not decode image: {e}")))?
            .to_rgb8();
        Ok(Self::new(image, params))
    }

    pub fn native_size(&self) -> Dimensions {
        Dimensions::new(self.image.width(), self.image.height())
    }
}
