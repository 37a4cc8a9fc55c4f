//! Image-to-video orchestration.
//!
//! ```text
//! image -> condition -> low-res latent -> 2x latent -> refined frames -> resize -> encode
//! ```
//!
//! Every stage consumes the previous stage's output. Any failure aborts the
//! request; nothing is retried and no partial file is handed out.

use std::sync::Arc;
use std::time::Instant;
use image::imageops::{self, FilterType};
use image::RgbImage;
use crate::adapter::SingleFrameAdapter;
use crate::artifact::{scratch_path, ResultArtifact};
use crate::codec::VideoCodec;
use crate::condition::Condition;
use crate::dimensions::{DimensionPolicy, DimensionResolver, Dimensions};
use crate::error::{Error, Result, Stage};
use crate::latent::LatentTensor;
use crate::lifecycle::ModelResources;
use crate::model::{GenerationCall, GenerationOutput, GuidanceMode, OutputFormat, RefineInput};
use crate::model_types::ModelVariant;
use crate::request::{GenerationParams, GenerationRequest, DEFAULT_GUIDANCE_SCALE, MAX_DIMENSION};
use crate::rng::SeededGenerator;

/// Options for one generator pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageConfig {
    pub size: Dimensions,
    pub steps: u32,
    pub guidance: GuidanceMode,
}

/// Per-stage options derived from a request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePlan {
    pub lowres: StageConfig,
    pub refine: StageConfig,
    pub output: Dimensions,
}

impl StagePlan {
    pub fn derive(
        params: &GenerationParams,
        expected: Dimensions,
        alignment: u32,
        variant: ModelVariant,
    ) -> Result<Self> {
        if expected.width > MAX_DIMENSION || expected.height > MAX_DIMENSION {
            return Err(Error::Input(format!(
                "{}x{} exceeds the {}px limit",
                expected.width, expected.height, MAX_DIMENSION
            )));
        }

        let lowres = expected.scaled_aligned(params.downscale_factor, alignment);
        if lowres.is_empty() {
            return Err(Error::Input(format!(
                "{}x{} scaled by {} collapses below the {}px grid",
                expected.width, expected.height, params.downscale_factor, alignment
            )));
        }

        let refine = lowres.doubled().ok_or_else(|| {
            Error::Input(format!("{}x{} cannot be doubled", lowres.width, lowres.height))
        })?;
        let guidance = guidance_for(variant, params.guidance_scale);

        Ok(Self {
            lowres: StageConfig {
                size: lowres,
                steps: params.steps_lowres,
                guidance,
            },
            refine: StageConfig {
                size: refine,
                steps: params.steps_refine,
                guidance,
            },
            output: expected,
        })
    }
}

fn guidance_for(variant: ModelVariant, requested: Option<f32>) -> GuidanceMode {
    if variant.accepts_guidance() {
        GuidanceMode::ClassifierFree {
            scale: requested.unwrap_or(DEFAULT_GUIDANCE_SCALE),
        }
    } else {
        GuidanceMode::Unguided
    }
}

/// Four-stage image-to-video pipeline over shared, preloaded models.
///
/// Holds no per-request state; callers serialize access to the device.
pub struct StagedPipeline {
    resources: ModelResources,
    adapter: SingleFrameAdapter,
    codec: Arc<dyn VideoCodec>,
    resolver: DimensionResolver,
}

impl StagedPipeline {
    pub fn new(resources: ModelResources, codec: Arc<dyn VideoCodec>) -> Self {
        let ratio = resources.generator().spatial_compression_ratio();
        Self {
            adapter: SingleFrameAdapter::new(codec.clone()),
            resolver: DimensionResolver::new(DimensionPolicy::for_compression_ratio(ratio)),
            resources,
            codec,
        }
    }

    pub fn resources(&self) -> &ModelResources {
        &self.resources
    }

    pub fn resolver(&self) -> &DimensionResolver {
        &self.resolver
    }

    pub fn codec(&self) -> &dyn VideoCodec {
        self.codec.as_ref()
    }

    pub fn alignment(&self) -> u32 {
        self.resources.generator().spatial_compression_ratio().max(1)
    }

    /// Resolve the output size from the source image, then run all stages
    pub fn generate(&self, request: &GenerationRequest) -> Result<ResultArtifact> {
        let params = &request.params;
        params.validate()?;
        let expected = self.resolver.resolve(
            request.native_size(),
            params.max_dimension,
            params.explicit_target(),
        )?;
        self.image_to_video(&request.image, params, expected)
    }

    pub fn image_to_video(
        &self,
        image: &RgbImage,
        params: &GenerationParams,
        expected: Dimensions,
    ) -> Result<ResultArtifact> {
        let _reclaim = self.resources.reclaim_on_drop();

        params.validate()?;
        let plan = StagePlan::derive(params, expected, self.alignment(), self.resources.variant())?;

        log::info!(
            "Generating {} frames: {}x{} -> {}x{} -> {}x{}",
            params.num_frames,
            plan.lowres.size.width,
            plan.lowres.size.height,
            plan.refine.size.width,
            plan.refine.size.height,
            plan.output.width,
            plan.output.height
        );

        let condition = self
            .adapter
            .condition(image)
            .map_err(|e| Stage::Condition.wrap(e))?;
        let conditions = [condition];

        // One generator for the whole request
        let mut generator = SeededGenerator::new(params.seed);

        let lowres = self.generate_lowres(&conditions, params, &plan, &mut generator)?;
        let upsampled = self.upsample(lowres)?;
        let frames = self.refine(&conditions, params, &plan, upsampled, &mut generator)?;
        let frames = resize_frames(frames, plan.output)?;

        self.encode(&frames, plan.output, params.fps)
    }

    fn generate_lowres(
        &self,
        conditions: &[Condition],
        params: &GenerationParams,
        plan: &StagePlan,
        generator: &mut SeededGenerator,
    ) -> Result<LatentTensor> {
        let stage = Stage::LowresGenerate;
        let started = Instant::now();

        let call = GenerationCall {
            conditions,
            prompt: &params.prompt,
            negative_prompt: &params.negative_prompt,
            width: plan.lowres.size.width,
            height: plan.lowres.size.height,
            num_frames: params.num_frames,
            steps: plan.lowres.steps,
            guidance: plan.lowres.guidance,
            refine: None,
            output: OutputFormat::Latent,
        };

        let output = self
            .resources
            .generator()
            .generate(call, generator)
            .map_err(|e| stage.wrap(e))?;

        log::info!("[{}] done in {:.1?}", stage, started.elapsed());

        match output {
            GenerationOutput::Latent(latents) => Ok(latents),
            other => Err(unexpected_output(stage, OutputFormat::Latent, other.kind())),
        }
    }

    fn upsample(&self, lowres: LatentTensor) -> Result<LatentTensor> {
        let stage = Stage::LatentUpsample;
        let started = Instant::now();
        let (height, width) = lowres.spatial();

        let upsampled = self
            .resources
            .upsampler()
            .upsample(lowres)
            .map_err(|e| stage.wrap(e))?;

        if upsampled.spatial() != (height * 2, width * 2) {
            return Err(Error::PipelineStage {
                stage,
                message: format!(
                    "expected {}x{} latent, upsampler returned {}x{}",
                    width * 2,
                    height * 2,
                    upsampled.spatial().1,
                    upsampled.spatial().0
                ),
            });
        }

        log::info!("[{}] done in {:.1?}", stage, started.elapsed());
        Ok(upsampled)
    }

    fn refine(
        &self,
        conditions: &[Condition],
        params: &GenerationParams,
        plan: &StagePlan,
        upsampled: LatentTensor,
        generator: &mut SeededGenerator,
    ) -> Result<Vec<RgbImage>> {
        let stage = Stage::Refine;
        let started = Instant::now();

        let call = GenerationCall {
            conditions,
            prompt: &params.prompt,
            negative_prompt: &params.negative_prompt,
            width: plan.refine.size.width,
            height: plan.refine.size.height,
            num_frames: params.num_frames,
            steps: plan.refine.steps,
            guidance: plan.refine.guidance,
            refine: Some(RefineInput {
                latents: upsampled,
                denoise_strength: params.denoise_strength,
                decode_timestep: params.decode_timestep,
                image_cond_noise_scale: params.image_cond_noise_scale,
            }),
            output: OutputFormat::Pixels,
        };

        let output = self
            .resources
            .generator()
            .generate(call, generator)
            .map_err(|e| stage.wrap(e))?;

        let frames = match output {
            GenerationOutput::Frames(frames) => frames,
            other => return Err(unexpected_output(stage, OutputFormat::Pixels, other.kind())),
        };

        if frames.len() != params.num_frames as usize {
            return Err(Error::PipelineStage {
                stage,
                message: format!("expected {} frames, got {}", params.num_frames, frames.len()),
            });
        }

        log::info!("[{}] done in {:.1?}", stage, started.elapsed());
        Ok(frames)
    }

    fn encode(&self, frames: &[RgbImage], size: Dimensions, fps: u32) -> Result<ResultArtifact> {
        let stage = Stage::Encode;
        let path = scratch_path(self.codec.extension()).map_err(|e| stage.wrap(e))?;
        // `path` is removed on drop if encoding fails halfway
        self.codec
            .encode(frames, &path, fps)
            .map_err(|e| stage.wrap(e))?;

        Ok(ResultArtifact::new(
            path,
            self.codec.media_type(),
            size,
            frames.len(),
            fps,
        ))
    }
}

/// Lanczos resample of every frame to the caller's size
fn resize_frames(frames: Vec<RgbImage>, size: Dimensions) -> Result<Vec<RgbImage>> {
    frames
        .into_iter()
        .map(|frame| {
            if frame.width() == 0 || frame.height() == 0 {
                return Err(Error::Postprocess {
                    stage: Stage::Resize,
                    message: "generator returned an empty frame".into(),
                });
            }
            if frame.dimensions() == (size.width, size.height) {
                return Ok(frame);
            }
            Ok(imageops::resize(&frame, size.width, size.height, FilterType::Lanczos3))
        })
        .collect()
}

fn unexpected_output(stage: Stage, expected: OutputFormat, got: OutputFormat) -> Error {
    Error::PipelineStage {
        stage,
        message: format!("expected {:?} output, got {:?}", expected, got),
    }
}
