//! Recording fakes for the model and codec boundaries.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use image::RgbImage;
use crate::codec::VideoCodec;
use crate::error::{Error, Result};
use crate::latent::LatentTensor;
use crate::model::{
    GenerationCall, GenerationOutput, GuidanceMode, LatentUpsampler, ModelHandle, ModelProvider,
    OutputFormat, VideoGenerator,
};
use crate::model_types::{ComputeDevice, ModelVariant, Precision};
use crate::rng::SeededGenerator;

#[derive(Debug, Clone, PartialEq)]
pub enum HandleEvent {
    ToDevice(ComputeDevice),
    ModelOffload,
    SequentialOffload,
    Tiling,
    AttentionSlicing(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Failure {
    Lowres,
    RefineOutOfMemory,
    UpsampleWrongSize,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: GuidanceMode,
    pub has_refine_input: bool,
    pub output: OutputFormat,
}

#[derive(Default)]
struct Shared {
    generator_events: Vec<HandleEvent>,
    upsampler_events: Vec<HandleEvent>,
    calls: Vec<RecordedCall>,
    upsamples: usize,
    releases: usize,
}

#[derive(Clone, Copy)]
enum Role {
    Generator,
    Upsampler,
}

pub struct FakeProvider {
    ratio: u32,
    failure: Option<Failure>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeProvider {
    pub fn new(ratio: u32) -> Self {
        Self {
            ratio,
            failure: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn generator_events(&self) -> Vec<HandleEvent> {
        self.shared.lock().unwrap().generator_events.clone()
    }

    pub fn upsampler_events(&self) -> Vec<HandleEvent> {
        self.shared.lock().unwrap().upsampler_events.clone()
    }

    pub fn upsample_count(&self) -> usize {
        self.shared.lock().unwrap().upsamples
    }

    pub fn release_count(&self) -> usize {
        self.shared.lock().unwrap().releases
    }

    fn model(&self, model_id: &str, role: Role) -> FakeModel {
        FakeModel {
            model_id: model_id.to_string(),
            role,
            ratio: self.ratio,
            failure: self.failure,
            shared: self.shared.clone(),
        }
    }
}

impl ModelProvider for FakeProvider {
    fn load_generator(&self, model_id: &str, _: Precision) -> Result<Box<dyn VideoGenerator>> {
        Ok(Box::new(self.model(model_id, Role::Generator)))
    }

    fn load_upsampler(&self, model_id: &str, _: Precision) -> Result<Box<dyn LatentUpsampler>> {
        Ok(Box::new(self.model(model_id, Role::Upsampler)))
    }
}

struct FakeModel {
    model_id: String,
    role: Role,
    ratio: u32,
    failure: Option<Failure>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeModel {
    fn record(&self, event: HandleEvent) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        match self.role {
            Role::Generator => shared.generator_events.push(event),
            Role::Upsampler => shared.upsampler_events.push(event),
        }
        Ok(())
    }
}

impl ModelHandle for FakeModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn to_device(&mut self, device: ComputeDevice) -> Result<()> {
        self.record(HandleEvent::ToDevice(device))
    }

    fn enable_model_offload(&mut self) -> Result<()> {
        self.record(HandleEvent::ModelOffload)
    }

    fn enable_sequential_offload(&mut self) -> Result<()> {
        self.record(HandleEvent::SequentialOffload)
    }

    fn enable_tiling(&mut self) -> Result<()> {
        self.record(HandleEvent::Tiling)
    }

    fn enable_attention_slicing(&mut self, granularity: usize) -> Result<()> {
        self.record(HandleEvent::AttentionSlicing(granularity))
    }

    fn release_cached_memory(&self) -> Result<()> {
        self.shared.lock().unwrap().releases += 1;
        Ok(())
    }
}

impl VideoGenerator for FakeModel {
    fn spatial_compression_ratio(&self) -> u32 {
        self.ratio
    }

    fn generate(
        &self,
        call: GenerationCall<'_>,
        _generator: &mut SeededGenerator,
    ) -> Result<GenerationOutput> {
        let distilled = ModelVariant::from_model_id(&self.model_id) == ModelVariant::Distilled;
        if distilled && call.guidance != GuidanceMode::Unguided {
            return Err(Error::Backend("distilled model got a guidance_scale".into()));
        }

        self.shared.lock().unwrap().calls.push(RecordedCall {
            width: call.width,
            height: call.height,
            steps: call.steps,
            guidance: call.guidance,
            has_refine_input: call.refine.is_some(),
            output: call.output,
        });

        let latent_h = (call.height / self.ratio) as usize;
        let latent_w = (call.width / self.ratio) as usize;

        match call.output {
            OutputFormat::Latent => {
                if self.failure == Some(Failure::Lowres) {
                    return Err(Error::Backend("lowres pass exploded".into()));
                }
                let frames = ((call.num_frames as usize).saturating_sub(1)) / 8 + 1;
                let shape = [1, 4, frames, latent_h, latent_w];
                LatentTensor::new(shape, vec![0.0; shape.iter().product()])
                    .map(GenerationOutput::Latent)
            }
            OutputFormat::Pixels => {
                if self.failure == Some(Failure::RefineOutOfMemory) {
                    return Err(Error::OutOfMemory("CUDA out of memory".into()));
                }
                if let Some(refine) = &call.refine {
                    if refine.latents.spatial() != (latent_h, latent_w) {
                        return Err(Error::Backend("latent does not match target size".into()));
                    }
                }
                let frames = (0..call.num_frames)
                    .map(|_| RgbImage::from_pixel(call.width, call.height, image::Rgb([1, 2, 3])))
                    .collect();
                Ok(GenerationOutput::Frames(frames))
            }
        }
    }
}

impl LatentUpsampler for FakeModel {
    fn upsample(&self, latents: LatentTensor) -> Result<LatentTensor> {
        self.shared.lock().unwrap().upsamples += 1;
        if self.failure == Some(Failure::UpsampleWrongSize) {
            return Ok(latents);
        }
        let [b, c, f, h, w] = latents.shape();
        let shape = [b, c, f, h * 2, w * 2];
        LatentTensor::new(shape, vec![0.0; shape.iter().product()])
    }
}

/// Uncompressed container: `width, height, count` as little-endian u32, then RGB bytes.
#[derive(Default)]
pub struct RawCodec {
    fail_after: Option<usize>,
    written: Mutex<Vec<PathBuf>>,
}

impl RawCodec {
    /// Let `n` encodes succeed, then fail after a partial write
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn written_paths(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().clone()
    }
}

impl VideoCodec for RawCodec {
    fn extension(&self) -> &'static str {
        "raw"
    }

    fn media_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn encode(&self, frames: &[RgbImage], path: &Path, _fps: u32) -> Result<()> {
        let index = {
            let mut written = self.written.lock().unwrap();
            written.push(path.to_path_buf());
            written.len() - 1
        };
        if self.fail_after.is_some_and(|n| index >= n) {
            std::fs::write(path, b"partial")?;
            return Err(Error::Codec("disk full".into()));
        }

        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        let mut bytes = Vec::new();
        for v in [width, height, frames.len() as u32] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for frame in frames {
            bytes.extend_from_slice(frame.as_raw());
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn decode(&self, path: &Path) -> Result<Vec<RgbImage>> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 12 {
            return Err(Error::Codec("truncated header".into()));
        }
        let read = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let (width, height, count) = (read(0), read(4), read(8) as usize);
        let frame_len = (width * height * 3) as usize;

        bytes[12..]
            .chunks(frame_len.max(1))
            .take(count)
            .map(|chunk| {
                RgbImage::from_raw(width, height, chunk.to_vec())
                    .ok_or_else(|| Error::Codec("truncated frame".into()))
            })
            .collect()
    }
}
