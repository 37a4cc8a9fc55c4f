use crate::error::Result;
use crate::model::{LatentUpsampler, ModelProvider, VideoGenerator};
use crate::model_types::{ComputeDevice, DevicePlacement, ModelVariant, Precision};

pub const DEFAULT_BASE_MODEL: &str = "Lightricks/LTX-Video-0.9.8-13B-distilled";
pub const DEFAULT_UPSAMPLER_MODEL: &str = "Lightricks/ltxv-spatial-upscaler-0.9.7";

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub base_model_id: String,
    pub upsampler_model_id: String,
    pub device: ComputeDevice,
    pub precision: Precision,
    pub placement: DevicePlacement,
    /// Attention slicing granularity, 0 disables slicing
    pub attention_slice: usize,
    pub vae_tiling: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            base_model_id: DEFAULT_BASE_MODEL.to_string(),
            upsampler_model_id: DEFAULT_UPSAMPLER_MODEL.to_string(),
            device: ComputeDevice::default(),
            precision: Precision::default(),
            placement: DevicePlacement::default(),
            attention_slice: 1,
            vae_tiling: true,
        }
    }
}

/// The two models every request shares, loaded once per process
pub struct ModelResources {
    generator: Box<dyn VideoGenerator>,
    upsampler: Box<dyn LatentUpsampler>,
    variant: ModelVariant,
    config: ResourceConfig,
}

impl ModelResources {
    pub fn load(provider: &dyn ModelProvider, config: ResourceConfig) -> Result<Self> {
        log::info!(
            "Loading models {} + {} ({}, placement: {})",
            config.base_model_id,
            config.upsampler_model_id,
            config.precision.id(),
            config.placement.id()
        );

        let mut generator = provider.load_generator(&config.base_model_id, config.precision)?;
        let mut upsampler = provider.load_upsampler(&config.upsampler_model_id, config.precision)?;

        match config.placement {
            DevicePlacement::Resident => {
                generator.to_device(config.device)?;
                upsampler.to_device(config.device)?;
            }
            DevicePlacement::ModelOffload => {
                generator.enable_model_offload()?;
                upsampler.enable_model_offload()?;
            }
            DevicePlacement::SequentialOffload => {
                generator.enable_sequential_offload()?;
                upsampler.enable_sequential_offload()?;
            }
        }

        if config.vae_tiling {
            generator.enable_tiling()?;
        }
        if config.attention_slice > 0 {
            generator.enable_attention_slicing(config.attention_slice)?;
            upsampler.enable_attention_slicing(config.attention_slice)?;
        }

        let variant = ModelVariant::from_model_id(&config.base_model_id);
        log::info!("Base model variant: {}", variant.id());

        Ok(Self {
            generator,
            upsampler,
            variant,
            config,
        })
    }

    pub fn generator(&self) -> &dyn VideoGenerator {
        self.generator.as_ref()
    }

    pub fn upsampler(&self) -> &dyn LatentUpsampler {
        self.upsampler.as_ref()
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Release cached device memory held by both models
    pub fn reclaim(&self) {
        if let Err(e) = self.generator.release_cached_memory() {
            log::warn!("Failed to release generator memory: {}", e);
        }
        if let Err(e) = self.upsampler.release_cached_memory() {
            log::warn!("Failed to release upsampler memory: {}", e);
        }
        log::debug!("Cleared accelerator memory cache");
    }

    /// Reclaims when dropped, whatever path the request took
    pub fn reclaim_on_drop(&self) -> ReclaimGuard<'_> {
        ReclaimGuard(self)
    }
}

pub struct ReclaimGuard<'a>(&'a ModelResources);

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        self.0.reclaim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeProvider, HandleEvent};

    fn load(placement: DevicePlacement) -> (FakeProvider, ModelResources) {
        let provider = FakeProvider::new(32);
        let config = ResourceConfig {
            placement,
            ..Default::default()
        };
        let resources = ModelResources::load(&provider, config).unwrap();
        (provider, resources)
    }

    #[test]
    fn test_resident_placement() {
        let (provider, _resources) = load(DevicePlacement::Resident);
        let generator = provider.generator_events();
        assert!(generator.contains(&HandleEvent::ToDevice(ComputeDevice::Cuda(0))));
        assert!(!generator.contains(&HandleEvent::ModelOffload));
        assert!(provider.upsampler_events().contains(&HandleEvent::ToDevice(ComputeDevice::Cuda(0))));
    }

    #[test]
    fn test_offload_modes_are_exclusive() {
        let (provider, _resources) = load(DevicePlacement::SequentialOffload);
        let events = provider.generator_events();
        assert!(events.contains(&HandleEvent::SequentialOffload));
        assert!(!events.contains(&HandleEvent::ModelOffload));
        assert!(!events.iter().any(|e| matches!(e, HandleEvent::ToDevice(_))));

        let (provider, _resources) = load(DevicePlacement::ModelOffload);
        assert!(provider.upsampler_events().contains(&HandleEvent::ModelOffload));
    }

    #[test]
    fn test_memory_savers_enabled() {
        let (provider, _resources) = load(DevicePlacement::Resident);
        assert!(provider.generator_events().contains(&HandleEvent::Tiling));
        assert!(provider.generator_events().contains(&HandleEvent::AttentionSlicing(1)));
        assert!(provider.upsampler_events().contains(&HandleEvent::AttentionSlicing(1)));
        assert!(!provider.upsampler_events().contains(&HandleEvent::Tiling));
    }

    #[test]
    fn test_variant_detected_at_load() {
        let (_provider, resources) = load(DevicePlacement::Resident);
        assert_eq!(resources.variant(), ModelVariant::Distilled);

        let provider = FakeProvider::new(32);
        let config = ResourceConfig {
            base_model_id: "Lightricks/LTX-Video-0.9.7-dev".into(),
            ..Default::default()
        };
        let resources = ModelResources::load(&provider, config).unwrap();
        assert_eq!(resources.variant(), ModelVariant::Standard);
    }

    #[test]
    fn test_reclaim_guard() {
        let (provider, resources) = load(DevicePlacement::Resident);
        {
            let _guard = resources.reclaim_on_drop();
        }
        assert_eq!(provider.release_count(), 2);
    }
}
