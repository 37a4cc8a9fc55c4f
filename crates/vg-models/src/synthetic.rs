// crates/vg-models/src/synthetic.rs

use std::marker::PhantomData;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::{Rgb, RgbImage};
use vg_core::condition::Condition;
use vg_core::error::{Error, Result};
use vg_core::latent::LatentTensor;
use vg_core::model::{
    GenerationCall, GenerationOutput, GuidanceMode, LatentUpsampler, ModelHandle, ModelProvider,
    OutputFormat, VideoGenerator,
};
use vg_core::rng::SeededGenerator;
use vg_core::{ComputeDevice, DevicePlacement, ModelVariant, Precision};

pub const LATENT_CHANNELS: usize = 8;
pub const TEMPORAL_COMPRESSION: usize = 8;

/// Procedural stand-in for the diffusion models.
///
/// Output depends only on the conditioning image, the call parameters and the
/// seeded generator, so identical requests give identical bytes. Used for dry
/// runs of the service and for tests.
#[derive(Debug, Clone)]
pub struct SyntheticProvider<B: Backend> {
    device: B::Device,
    compression_ratio: u32,
    memory_limit: Option<usize>,
}

impl<B: Backend> SyntheticProvider<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            compression_ratio: 32,
            memory_limit: None,
        }
    }

    pub fn with_compression_ratio(mut self, ratio: u32) -> Self {
        self.compression_ratio = ratio.max(1);
        self
    }

    /// Fail with out-of-memory above this many latent elements
    pub fn with_memory_limit(mut self, elements: usize) -> Self {
        self.memory_limit = Some(elements);
        self
    }

    fn state(&self, model_id: &str, precision: Precision) -> SyntheticState<B> {
        log::info!("Loading synthetic model {} ({})", model_id, precision.id());
        SyntheticState {
            model_id: model_id.to_string(),
            device: self.device.clone(),
            memory_limit: self.memory_limit,
            placement: None,
            tiling: false,
            attention_slice: None,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> ModelProvider for SyntheticProvider<B> {
    fn load_generator(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn VideoGenerator>> {
        Ok(Box::new(SyntheticGenerator {
            variant: ModelVariant::from_model_id(model_id),
            compression_ratio: self.compression_ratio,
            state: self.state(model_id, precision),
        }))
    }

    fn load_upsampler(
        &self,
        model_id: &str,
        precision: Precision,
    ) -> Result<Box<dyn LatentUpsampler>> {
        Ok(Box::new(SyntheticUpsampler {
            state: self.state(model_id, precision),
        }))
    }
}

#[derive(Debug)]
struct SyntheticState<B: Backend> {
    model_id: String,
    device: B::Device,
    memory_limit: Option<usize>,
    placement: Option<(DevicePlacement, Option<ComputeDevice>)>,
    tiling: bool,
    attention_slice: Option<usize>,
    _backend: PhantomData<B>,
}

impl<B: Backend> SyntheticState<B> {
    fn check_memory(&self, shape: [usize; 5]) -> Result<()> {
        let elements: usize = shape.iter().product();
        match self.memory_limit {
            Some(limit) if elements > limit => Err(Error::OutOfMemory(format!(
                "{} needs {} latent elements, limit is {}",
                self.model_id, elements, limit
            ))),
            _ => Ok(()),
        }
    }

    fn place(&mut self, placement: DevicePlacement, device: Option<ComputeDevice>) -> Result<()> {
        log::debug!("{}: placement {}", self.model_id, placement.id());
        self.placement = Some((placement, device));
        Ok(())
    }

    fn release(&self) -> Result<()> {
        log::trace!(
            "{}: release (placement {:?}, tiling {}, slicing {:?})",
            self.model_id,
            self.placement,
            self.tiling,
            self.attention_slice
        );
        Ok(())
    }

    fn noise(&self, shape: [usize; 5], generator: &mut SeededGenerator) -> Tensor<B, 5> {
        let values = generator.gaussian_vec(shape.iter().product());
        Tensor::from_data(TensorData::new(values, shape), &self.device)
    }
}

macro_rules! synthetic_handle {
    ($ty:ident) => {
        impl<B: Backend> ModelHandle for $ty<B> {
            fn model_id(&self) -> &str {
                &self.state.model_id
            }

            fn to_device(&mut self, device: ComputeDevice) -> Result<()> {
                self.state.place(DevicePlacement::Resident, Some(device))
            }

            fn enable_model_offload(&mut self) -> Result<()> {
                self.state.place(DevicePlacement::ModelOffload, None)
            }

            fn enable_sequential_offload(&mut self) -> Result<()> {
                self.state.place(DevicePlacement::SequentialOffload, None)
            }

            fn enable_tiling(&mut self) -> Result<()> {
                self.state.tiling = true;
                Ok(())
            }

            fn enable_attention_slicing(&mut self, granularity: usize) -> Result<()> {
                self.state.attention_slice = Some(granularity);
                Ok(())
            }

            fn release_cached_memory(&self) -> Result<()> {
                self.state.release()
            }
        }
    };
}

pub struct SyntheticGenerator<B: Backend> {
    variant: ModelVariant,
    compression_ratio: u32,
    state: SyntheticState<B>,
}

synthetic_handle!(SyntheticGenerator);

impl<B: Backend> SyntheticGenerator<B> {
    fn latent_shape(&self, call: &GenerationCall<'_>) -> Result<[usize; 5]> {
        let ratio = self.compression_ratio;
        if call.width % ratio != 0 || call.height % ratio != 0 || call.width == 0 || call.height == 0 {
            return Err(Error::Backend(format!(
                "{}x{} is not a positive multiple of {}",
                call.width, call.height, ratio
            )));
        }
        let frames = (call.num_frames.max(1) as usize - 1) / TEMPORAL_COMPRESSION + 1;
        Ok([
            1,
            LATENT_CHANNELS,
            frames,
            (call.height / ratio) as usize,
            (call.width / ratio) as usize,
        ])
    }

    /// The conditioning frame sampled onto the latent grid, in [-1, 1]
    fn condition_latent(&self, condition: &Condition, shape: [usize; 5]) -> Result<Tensor<B, 5>> {
        let frame = condition
            .first_frame()
            .ok_or_else(|| Error::Backend("condition holds no frames".into()))?;
        let [_, channels, frames, height, width] = shape;
        let (fw, fh) = frame.dimensions();
        if fw == 0 || fh == 0 {
            return Err(Error::Backend("conditioning frame is empty".into()));
        }

        let mut values = Vec::with_capacity(shape.iter().product());
        for c in 0..channels {
            for _ in 0..frames {
                for y in 0..height {
                    for x in 0..width {
                        let value = if c < 3 {
                            let px = (x * fw as usize / width) as u32;
                            let py = (y * fh as usize / height) as u32;
                            frame.get_pixel(px.min(fw - 1), py.min(fh - 1))[c] as f32 / 127.5 - 1.0
                        } else {
                            0.0
                        };
                        values.push(value);
                    }
                }
            }
        }

        Ok(Tensor::from_data(TensorData::new(values, shape), &self.state.device))
    }

    /// Pull `latents` toward `target`, one fraction per step
    fn denoise(&self, mut latents: Tensor<B, 5>, target: Tensor<B, 5>, steps: u32) -> Tensor<B, 5> {
        let rate = 1.0 / (steps as f32 + 1.0);
        for _ in 0..steps {
            latents = latents
                .mul_scalar(1.0 - rate)
                .add(target.clone().mul_scalar(rate));
        }
        latents
    }

    fn decode(
        &self,
        latents: Tensor<B, 5>,
        call: &GenerationCall<'_>,
        decode_timestep: f32,
        generator: &mut SeededGenerator,
    ) -> Result<Vec<RgbImage>> {
        let latents = LatentTensor::from_tensor(latents.tanh())?;
        let [_, _, frames, height, width] = latents.shape();
        let values = latents.values();
        let index = |c: usize, f: usize, y: usize, x: usize| ((c * frames + f) * height + y) * width + x;

        let out_frames = call.num_frames as usize;
        let (w, h) = (call.width, call.height);

        Ok((0..out_frames)
            .map(|t| {
                let f = (t * frames / out_frames).min(frames - 1);
                let grain = generator.next_gaussian() * decode_timestep * 16.0;
                RgbImage::from_fn(w, h, |x, y| {
                    let lx = (x as usize * width / w as usize).min(width - 1);
                    let ly = (y as usize * height / h as usize).min(height - 1);
                    let channel = |c: usize| {
                        ((values[index(c, f, ly, lx)] + 1.0) * 127.5 + grain).clamp(0.0, 255.0) as u8
                    };
                    Rgb([channel(0), channel(1), channel(2)])
                })
            })
            .collect())
    }
}

impl<B: Backend> VideoGenerator for SyntheticGenerator<B> {
    fn spatial_compression_ratio(&self) -> u32 {
        self.compression_ratio
    }

    fn generate(
        &self,
        mut call: GenerationCall<'_>,
        generator: &mut SeededGenerator,
    ) -> Result<GenerationOutput> {
        let guidance_scale = match (self.variant, call.guidance) {
            (ModelVariant::Distilled, GuidanceMode::ClassifierFree { .. }) => {
                return Err(Error::Backend(format!(
                    "{} is distilled and takes no guidance_scale",
                    self.state.model_id
                )));
            }
            (_, mode) => mode.scale(),
        };

        let shape = self.latent_shape(&call)?;
        self.state.check_memory(shape)?;

        let condition = call
            .conditions
            .first()
            .ok_or_else(|| Error::Backend("no conditioning supplied".into()))?;
        let target = self.condition_latent(condition, shape)?;

        let (latents, decode_timestep) = match call.refine.take() {
            None => {
                let mut start = self.state.noise(shape, generator);
                if let Some(scale) = guidance_scale {
                    start = start.mul_scalar(1.0 / (1.0 + scale * 0.1));
                }
                (self.denoise(start, target, call.steps), 0.0)
            }
            Some(refine) => {
                if refine.latents.shape() != shape {
                    return Err(Error::Backend(format!(
                        "input latents {:?} do not match target {:?}",
                        refine.latents.shape(),
                        shape
                    )));
                }
                let strength = refine.denoise_strength;
                let noise = self.state.noise(shape, generator);
                let cond_noise = self.state.noise(shape, generator);
                let init = refine.latents.into_tensor::<B>(&self.state.device);
                let start = init
                    .mul_scalar(1.0 - strength)
                    .add(noise.mul_scalar(strength));
                let target = target.add(cond_noise.mul_scalar(refine.image_cond_noise_scale));
                let steps = ((call.steps as f32) * strength).ceil() as u32;
                (self.denoise(start, target, steps), refine.decode_timestep)
            }
        };

        match call.output {
            OutputFormat::Latent => Ok(GenerationOutput::Latent(LatentTensor::from_tensor(latents)?)),
            OutputFormat::Pixels => Ok(GenerationOutput::Frames(self.decode(
                latents,
                &call,
                decode_timestep,
                generator,
            )?)),
        }
    }
}

pub struct SyntheticUpsampler<B: Backend> {
    state: SyntheticState<B>,
}

synthetic_handle!(SyntheticUpsampler);

impl<B: Backend> LatentUpsampler for SyntheticUpsampler<B> {
    /// Nearest-neighbour 2x in latent space
    fn upsample(&self, latents: LatentTensor) -> Result<LatentTensor> {
        let [b, c, f, h, w] = latents.shape();
        let out_shape = [b, c, f, h * 2, w * 2];
        self.state.check_memory(out_shape)?;

        let upsampled = latents
            .into_tensor::<B>(&self.state.device)
            .reshape([b * c * f, h, 1, w, 1])
            .repeat_dim(2, 2)
            .repeat_dim(4, 2)
            .reshape(out_shape);

        LatentTensor::from_tensor(upsampled)
    }
}
