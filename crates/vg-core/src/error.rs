use std::fmt;
use thiserror::Error;

/// Point in the request lifecycle where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Condition,
    LowresGenerate,
    LatentUpsample,
    Refine,
    Resize,
    Encode,
}

impl Stage {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::LowresGenerate => "lowres_generate",
            Self::LatentUpsample => "latent_upsample",
            Self::Refine => "refine",
            Self::Resize => "resize",
            Self::Encode => "encode",
        }
    }

    /// Resize and encode run after generation succeeded.
    pub fn is_postprocess(&self) -> bool {
        matches!(self, Self::Resize | Self::Encode)
    }

    /// Classify a raw error raised while this stage was running.
    pub fn wrap(self, err: Error) -> Error {
        match err {
            Error::Input(_)
            | Error::ResourceExhausted { .. }
            | Error::PipelineStage { .. }
            | Error::Postprocess { .. } => err,
            Error::OutOfMemory(message) => Error::ResourceExhausted { stage: self, message },
            other if self.is_postprocess() => Error::Postprocess {
                stage: self,
                message: other.to_string(),
            },
            other => Error::PipelineStage {
                stage: self,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request or undecodable upload.
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Accelerator memory exhausted during {stage}: {message}")]
    ResourceExhausted { stage: Stage, message: String },

    #[error("Stage {stage} failed: {message}")]
    PipelineStage { stage: Stage, message: String },

    #[error("Postprocessing failed at {stage}: {message}")]
    Postprocess { stage: Stage, message: String },

    /// Raised by model handles. The pipeline turns it into a stage error.
    #[error("Model backend error: {0}")]
    Backend(String),

    /// Raised by model handles when the device runs out of memory.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_becomes_stage_error() {
        let err = Stage::Refine.wrap(Error::Backend("boom".into()));
        match err {
            Error::PipelineStage { stage, message } => {
                assert_eq!(stage, Stage::Refine);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oom_becomes_resource_exhausted() {
        let err = Stage::LowresGenerate.wrap(Error::OutOfMemory("cuda".into()));
        assert!(matches!(
            err,
            Error::ResourceExhausted { stage: Stage::LowresGenerate, .. }
        ));
    }

    #[test]
    fn test_postprocess_classification() {
        let err = Stage::Encode.wrap(Error::Codec("ffmpeg exited 1".into()));
        assert!(matches!(err, Error::Postprocess { stage: Stage::Encode, .. }));
    }

    #[test]
    fn test_already_classified_is_kept() {
        let err = Stage::Refine.wrap(Error::Input("bad".into()));
        assert!(matches!(err, Error::Input(_)));
    }
}
