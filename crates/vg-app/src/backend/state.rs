use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::info;
use uuid::Uuid;
use vg_core::artifact::ResultArtifact;
use vg_core::pipeline::StagedPipeline;
use vg_core::request::GenerationRequest;
use crate::error::AppError;

/// Shared by every handler. Owns the one pipeline and the gate in front of it.
pub struct GenState {
    pipeline: Arc<StagedPipeline>,
    gate: Arc<Semaphore>,
}

impl GenState {
    pub fn new(pipeline: StagedPipeline, max_concurrent: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            gate: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn pipeline(&self) -> &StagedPipeline {
        &self.pipeline
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Queue for a slot, then run the pipeline off the async executor.
    ///
    /// The permit moves into the blocking task, so a dropped request keeps its
    /// slot until the pipeline actually returns.
    pub async fn generate(
        &self,
        request_id: Uuid,
        request: GenerationRequest,
    ) -> Result<ResultArtifact, AppError> {
        let queued = Instant::now();
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("generation gate closed".into()))?;
        info!(%request_id, waited = ?queued.elapsed(), "Generation slot acquired");

        let pipeline = self.pipeline.clone();
        let started = Instant::now();
        let artifact = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pipeline.generate(&request)
        })
        .await
        .map_err(|e| AppError::Internal(format!("generation task failed: {e}")))??;

        info!(
            %request_id,
            elapsed = ?started.elapsed(),
            frames = artifact.frame_count(),
            width = artifact.dimensions().width,
            height = artifact.dimensions().height,
            "Generation finished"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use vg_core::codec::VideoCodec;
    use vg_core::lifecycle::{ModelResources, ResourceConfig};
    use vg_core::request::GenerationParams;
    use vg_models::{GifCodec, SyntheticProvider};
    use super::*;

    /// GIF codec that holds every encode open and records the overlap
    #[derive(Default)]
    struct SlowCodec {
        active: AtomicUsize,
        peak: AtomicUsize,
        encodes: AtomicUsize,
    }

    impl VideoCodec for SlowCodec {
        fn extension(&self) -> &'static str {
            GifCodec.extension()
        }

        fn media_type(&self) -> &'static str {
            GifCodec.media_type()
        }

        fn encode(&self, frames: &[RgbImage], path: &Path, fps: u32) -> vg_core::error::Result<()> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.encodes.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(40));
            let result = GifCodec.encode(frames, path, fps);
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn decode(&self, path: &Path) -> vg_core::error::Result<Vec<RgbImage>> {
            GifCodec.decode(path)
        }
    }

    fn gen_state(codec: Arc<SlowCodec>, max_concurrent: usize) -> GenState {
        let provider = SyntheticProvider::<NdArray>::new(Default::default()).with_compression_ratio(8);
        let resources = ModelResources::load(&provider, ResourceConfig::default()).unwrap();
        GenState::new(StagedPipeline::new(resources, codec), max_concurrent)
    }

    fn request(seed: u64) -> GenerationRequest {
        let image = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 64]));
        GenerationRequest::new(
            image,
            GenerationParams {
                prompt: "drifting clouds".into(),
                max_dimension: 32,
                num_frames: 9,
                steps_lowres: 2,
                steps_refine: 2,
                fps: 8,
                seed,
                ..GenerationParams::default()
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_slot_runs_one_generation_at_a_time() {
        let codec = Arc::new(SlowCodec::default());
        let state = Arc::new(gen_state(codec.clone(), 1));

        let tasks: Vec<_> = (0..3)
            .map(|seed| {
                let state = state.clone();
                tokio::spawn(async move { state.generate(Uuid::new_v4(), request(seed)).await })
            })
            .collect();

        for task in tasks {
            let artifact = task.await.unwrap().unwrap();
            assert_eq!(artifact.frame_count(), 9);
        }

        // condition + final encode per request
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 6);
        assert_eq!(codec.peak.load(Ordering::SeqCst), 1);
        assert_eq!(state.available_slots(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_request_waits_for_slot() {
        let codec = Arc::new(SlowCodec::default());
        let state = Arc::new(gen_state(codec.clone(), 1));

        let held = state.gate.clone().acquire_owned().await.unwrap();
        assert_eq!(state.available_slots(), 0);

        let queued = {
            let state = state.clone();
            tokio::spawn(async move { state.generate(Uuid::new_v4(), request(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 0);

        drop(held);
        queued.await.unwrap().unwrap();
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 2);
    }
}
