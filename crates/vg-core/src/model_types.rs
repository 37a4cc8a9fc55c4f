use std::fmt;
use std::str::FromStr;
use crate::error::Error;

/// Base model family, decided once when the model is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    /// Step-distilled weights. Classifier-free guidance is baked in.
    Distilled,
    Standard,
}

impl ModelVariant {
    pub fn from_model_id(model_id: &str) -> Self {
        if model_id.to_lowercase().contains("distilled") {
            Self::Distilled
        } else {
            Self::Standard
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Distilled => "distilled",
            Self::Standard => "standard",
        }
    }

    /// Whether generation calls may carry a guidance scale
    pub fn accepts_guidance(&self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// Numeric precision used when loading weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    F32,
    F16,
    #[default]
    Bf16,
}

impl Precision {
    pub fn id(&self) -> &str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::Bf16 => "bf16",
        }
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f16" | "float16" | "fp16" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            other => Err(Error::Config(format!("unknown precision '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl Default for ComputeDevice {
    fn default() -> Self {
        Self::Cuda(0)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(0) => f.write_str("cuda"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

impl FromStr for ComputeDevice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| Error::Config(format!("unknown device '{other}'"))),
        }
    }
}

/// Where model weights live between calls. The three modes are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePlacement {
    /// Whole graph stays on the accelerator
    #[default]
    Resident,
    /// Components move to host memory when idle
    ModelOffload,
    /// Same as model offload, at submodule granularity
    SequentialOffload,
}

impl DevicePlacement {
    pub fn id(&self) -> &str {
        match self {
            Self::Resident => "resident",
            Self::ModelOffload => "model_offload",
            Self::SequentialOffload => "sequential_offload",
        }
    }
}

impl FromStr for DevicePlacement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "resident" => Ok(Self::Resident),
            "model" | "model_offload" => Ok(Self::ModelOffload),
            "sequential" | "sequential_offload" => Ok(Self::SequentialOffload),
            other => Err(Error::Config(format!("unknown offload mode '{other}'"))),
        }
    }
}
