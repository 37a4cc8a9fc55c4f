// crates/vg-models/src/remote.rs

use std::io::Cursor;
use std::time::Duration;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, RgbImage};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vg_core::error::{Error, Result};
use vg_core::latent::LatentTensor;
use vg_core::model::{
    GenerationCall, GenerationOutput, GuidanceMode, LatentUpsampler, ModelHandle, ModelProvider,
    OutputFormat, VideoGenerator,
};
use vg_core::rng::SeededGenerator;
use vg_core::{ComputeDevice, Precision};

/// JSON-over-HTTP client for an inference worker that hosts the actual
/// diffusion pipelines.
///
/// Every reply is `{"status": "success", "data": ...}` or
/// `{"status": "error", "error": "...", "error_kind": "out_of_memory"}`.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    client: Client,
    base_url: String,
}

impl WorkerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).json(body).send().map_err(|e| {
            Error::Backend(format!(
                "Failed to reach inference worker at {url}: {e}. Make sure the worker is running"
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            if status == StatusCode::INSUFFICIENT_STORAGE {
                return Err(Error::OutOfMemory(body));
            }
            return Err(Error::Backend(format!("HTTP {}: {}", status, body)));
        }

        let reply: WorkerReply = response
            .json()
            .map_err(|e| Error::Backend(format!("Failed to parse worker reply: {e}")))?;
        reply.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_kind: Option<String>,
}

impl WorkerReply {
    fn into_result<R: DeserializeOwned>(self) -> Result<R> {
        match self.status.as_str() {
            "success" => serde_json::from_value(self.data)
                .map_err(|e| Error::Backend(format!("Unexpected worker payload: {e}"))),
            "error" => {
                let message = self.error.unwrap_or_else(|| "Unknown error".to_string());
                match self.error_kind.as_deref() {
                    Some("out_of_memory") => Err(Error::OutOfMemory(message)),
                    _ => Err(Error::Backend(message)),
                }
            }
            other => Err(Error::Backend(format!("Unexpected status: {}", other))),
        }
    }
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    model_id: &'a str,
    precision: &'a str,
    kind: &'a str,
}

#[derive(Deserialize)]
struct LoadReply {
    handle: String,
    #[serde(default)]
    spatial_compression_ratio: Option<u32>,
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum PlacementRequest {
    Device { device: String },
    ModelOffload,
    SequentialOffload,
}

#[derive(Serialize)]
struct SlicingRequest {
    granularity: usize,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
struct ConditionBody {
    /// Base64 PNG per frame
    video: Vec<String>,
    frame_index: u32,
}

#[derive(Debug, Serialize)]
struct RefineBody {
    latents: LatentTensor,
    denoise_strength: f32,
    decode_timestep: f32,
    image_cond_noise_scale: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    conditions: Vec<ConditionBody>,
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    num_frames: u32,
    num_inference_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance_scale: Option<f32>,
    seed: u64,
    #[serde(flatten)]
    refine: Option<RefineBody>,
    output_type: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn from_call(call: GenerationCall<'a>, seed: u64) -> Result<Self> {
        let conditions = call
            .conditions
            .iter()
            .map(|condition| {
                Ok(ConditionBody {
                    video: condition.video.iter().map(encode_png).collect::<Result<_>>()?,
                    frame_index: condition.frame_index,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let guidance_scale = match call.guidance {
            GuidanceMode::Unguided => None,
            GuidanceMode::ClassifierFree { scale } => Some(scale),
        };

        let refine = call.refine.map(|refine| RefineBody {
            latents: refine.latents,
            denoise_strength: refine.denoise_strength,
            decode_timestep: refine.decode_timestep,
            image_cond_noise_scale: refine.image_cond_noise_scale,
        });

        Ok(Self {
            conditions,
            prompt: call.prompt,
            negative_prompt: call.negative_prompt,
            width: call.width,
            height: call.height,
            num_frames: call.num_frames,
            num_inference_steps: call.steps,
            guidance_scale,
            seed,
            refine,
            output_type: match call.output {
                OutputFormat::Latent => "latent",
                OutputFormat::Pixels => "pil",
            },
        })
    }
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    latents: Option<LatentTensor>,
    #[serde(default)]
    frames: Option<Vec<String>>,
}

#[derive(Serialize)]
struct UpsampleRequest {
    latents: LatentTensor,
}

#[derive(Deserialize)]
struct UpsampleReply {
    latents: LatentTensor,
}

fn encode_png(frame: &RgbImage) -> Result<String> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(frame.clone()).write_to(&mut bytes, ImageFormat::Png)?;
    Ok(STANDARD.encode(bytes.into_inner()))
}

fn decode_png(data: &str) -> Result<RgbImage> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| Error::Backend(format!("Invalid frame encoding: {e}")))?;
    Ok(image::load_from_memory(&bytes)?.into_rgb8())
}

/// Loads models into a remote worker
#[derive(Debug, Clone)]
pub struct RemoteProvider {
    worker: WorkerClient,
}

impl RemoteProvider {
    pub fn new(worker: WorkerClient) -> Self {
        Self { worker }
    }

    fn load(&self, model_id: &str, precision: Precision, kind: &str) -> Result<(RemoteHandle, LoadReply)> {
        log::info!("Loading {} {} on {}", kind, model_id, self.worker.base_url());
        let reply: LoadReply = self.worker.post(
            "/models/load",
            &LoadRequest {
                model_id,
                precision: precision.id(),
                kind,
            },
        )?;

        let handle = RemoteHandle {
            worker: self.worker.clone(),
            handle: reply.handle.clone(),
            model_id: model_id.to_string(),
        };
        Ok((handle, reply))
    }
}

impl ModelProvider for RemoteProvider {
    fn load_generator(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn VideoGenerator>> {
        let (handle, reply) = self.load(model_id, precision, "generator")?;
        Ok(Box::new(RemoteGenerator {
            handle,
            compression_ratio: reply.spatial_compression_ratio.unwrap_or(32),
        }))
    }

    fn load_upsampler(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn LatentUpsampler>> {
        let (handle, _) = self.load(model_id, precision, "upsampler")?;
        Ok(Box::new(RemoteUpsampler { handle }))
    }
}

struct RemoteHandle {
    worker: WorkerClient,
    handle: String,
    model_id: String,
}

impl RemoteHandle {
    fn post<B: Serialize, R: DeserializeOwned>(&self, op: &str, body: &B) -> Result<R> {
        self.worker.post(&format!("/models/{}/{}", self.handle, op), body)
    }

    fn place(&self, placement: PlacementRequest) -> Result<()> {
        self.post("placement", &placement)
    }
}

impl ModelHandle for RemoteHandle {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn to_device(&mut self, device: ComputeDevice) -> Result<()> {
        self.place(PlacementRequest::Device {
            device: device.to_string(),
        })
    }

    fn enable_model_offload(&mut self) -> Result<()> {
        self.place(PlacementRequest::ModelOffload)
    }

    fn enable_sequential_offload(&mut self) -> Result<()> {
        self.place(PlacementRequest::SequentialOffload)
    }

    fn enable_tiling(&mut self) -> Result<()> {
        self.post("tiling", &Empty {})
    }

    fn enable_attention_slicing(&mut self, granularity: usize) -> Result<()> {
        self.post("attention_slicing", &SlicingRequest { granularity })
    }

    fn release_cached_memory(&self) -> Result<()> {
        self.post("release", &Empty {})
    }
}

macro_rules! delegate_handle {
    ($ty:ident) => {
        impl ModelHandle for $ty {
            fn model_id(&self) -> &str {
                self.handle.model_id()
            }

            fn to_device(&mut self, device: ComputeDevice) -> Result<()> {
                self.handle.to_device(device)
            }

            fn enable_model_offload(&mut self) -> Result<()> {
                self.handle.enable_model_offload()
            }

            fn enable_sequential_offload(&mut self) -> Result<()> {
                self.handle.enable_sequential_offload()
            }

            fn enable_tiling(&mut self) -> Result<()> {
                self.handle.enable_tiling()
            }

            fn enable_attention_slicing(&mut self, granularity: usize) -> Result<()> {
                self.handle.enable_attention_slicing(granularity)
            }

            fn release_cached_memory(&self) -> Result<()> {
                self.handle.release_cached_memory()
            }
        }
    };
}

pub struct RemoteGenerator {
    handle: RemoteHandle,
    compression_ratio: u32,
}

delegate_handle!(RemoteGenerator);

impl VideoGenerator for RemoteGenerator {
    fn spatial_compression_ratio(&self) -> u32 {
        self.compression_ratio
    }

    fn generate(
        &self,
        call: GenerationCall<'_>,
        generator: &mut SeededGenerator,
    ) -> Result<GenerationOutput> {
        let output = call.output;
        // Each call draws its worker-side seed from the request generator
        let seed = ((generator.next_u32() as u64) << 32) | generator.next_u32() as u64;
        let request = GenerateRequest::from_call(call, seed)?;
        let reply: GenerateReply = self.handle.post("generate", &request)?;

        match (output, reply.latents, reply.frames) {
            (OutputFormat::Latent, Some(latents), _) => Ok(GenerationOutput::Latent(latents)),
            (OutputFormat::Pixels, _, Some(frames)) => Ok(GenerationOutput::Frames(
                frames.iter().map(|f| decode_png(f)).collect::<Result<_>>()?,
            )),
            (expected, _, _) => Err(Error::Backend(format!(
                "Worker reply is missing {:?} output",
                expected
            ))),
        }
    }
}

pub struct RemoteUpsampler {
    handle: RemoteHandle,
}

delegate_handle!(RemoteUpsampler);

impl LatentUpsampler for RemoteUpsampler {
    fn upsample(&self, latents: LatentTensor) -> Result<LatentTensor> {
        let reply: UpsampleReply = self.handle.post("upsample", &UpsampleRequest { latents })?;
        Ok(reply.latents)
    }
}
