use std::path::Path;
use image::RgbImage;
use crate::error::Result;

/// Encodes frame sequences into a container file and back
pub trait VideoCodec: Send + Sync {
    /// File extension, without the dot
    fn extension(&self) -> &'static str;

    fn media_type(&self) -> &'static str;

    fn encode(&self, frames: &[RgbImage], path: &Path, fps: u32) -> Result<()>;

    fn decode(&self, path: &Path) -> Result<Vec<RgbImage>>;
}
