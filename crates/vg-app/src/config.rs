use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{anyhow, bail};
use vg_core::lifecycle::{ResourceConfig, DEFAULT_BASE_MODEL, DEFAULT_UPSAMPLER_MODEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    /// Model handles hosted by an inference worker process
    Remote,
    /// Seed-deterministic burn stand-in
    Synthetic,
}

impl FromStr for ModelBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(ModelBackend::Remote),
            "synthetic" => Ok(ModelBackend::Synthetic),
            other => Err(anyhow!("unknown model backend '{other}' (remote, synthetic)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Mp4,
    Gif,
}

impl FromStr for CodecKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(CodecKind::Mp4),
            "gif" => Ok(CodecKind::Gif),
            other => Err(anyhow!("unknown video codec '{other}' (mp4, gif)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backend: ModelBackend,
    pub worker_url: String,
    pub worker_timeout: Duration,
    pub codec: CodecKind,
    pub max_concurrent_generations: usize,
    pub max_upload_bytes: usize,
    pub resources: ResourceConfig,
}

impl AppConfig {
    /// Read the process environment, after an optional `.env`
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let max_concurrent_generations = parse(&lookup, "MAX_CONCURRENT_GENERATIONS", 1usize)?;
        if max_concurrent_generations == 0 {
            bail!("MAX_CONCURRENT_GENERATIONS must be at least 1");
        }

        let resources = ResourceConfig {
            base_model_id: lookup("BASE_MODEL_ID").unwrap_or_else(|| DEFAULT_BASE_MODEL.to_string()),
            upsampler_model_id: lookup("UPSAMPLER_ID")
                .unwrap_or_else(|| DEFAULT_UPSAMPLER_MODEL.to_string()),
            device: parse(&lookup, "DEVICE", Default::default())?,
            precision: parse(&lookup, "PRECISION", Default::default())?,
            placement: parse(&lookup, "OFFLOAD", Default::default())?,
            attention_slice: parse(&lookup, "ATTENTION_SLICE", 1)?,
            ..ResourceConfig::default()
        };

        Ok(Self {
            port: parse(&lookup, "PORT", 8000)?,
            backend: parse(&lookup, "MODEL_BACKEND", ModelBackend::Remote)?,
            worker_url: lookup("INFERENCE_WORKER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5000".to_string()),
            worker_timeout: Duration::from_secs(parse(&lookup, "WORKER_TIMEOUT_SECS", 1800)?),
            codec: parse(&lookup, "VIDEO_CODEC", CodecKind::Mp4)?,
            max_concurrent_generations,
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", 32 * 1024 * 1024)?,
            resources,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key}={value} is invalid: {e}")),
        _ => Ok(default),
    }
}
