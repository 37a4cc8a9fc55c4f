// crates/vg-models/src/codec.rs

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::{AnimationDecoder, Delay, DynamicImage, Frame, RgbImage};
use vg_core::codec::VideoCodec;
use vg_core::error::{Error, Result};

/// Animated GIF through the `image` crate. No external tools needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifCodec;

impl VideoCodec for GifCodec {
    fn extension(&self) -> &'static str {
        "gif"
    }

    fn media_type(&self) -> &'static str {
        "image/gif"
    }

    fn encode(&self, frames: &[RgbImage], path: &Path, fps: u32) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Codec("cannot encode an empty frame sequence".into()));
        }

        let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite)?;
            encoder.encode_frames(frames.iter().map(|frame| {
                let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
                Frame::from_parts(rgba, 0, 0, delay)
            }))?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn decode(&self, path: &Path) -> Result<Vec<RgbImage>> {
        let reader = BufReader::new(File::open(path)?);
        let frames = GifDecoder::new(reader)?.into_frames().collect_frames()?;
        Ok(frames
            .into_iter()
            .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()).into_rgb8())
            .collect())
    }
}

/// H.264 MP4 by shelling out to `ffmpeg`
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    binary: PathBuf,
    crf: u8,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            crf: 18,
        }
    }
}

impl FfmpegCodec {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Default::default()
        }
    }

    /// Whether the binary can be launched at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .output()
            .map_err(|e| Error::Codec(format!("failed to run {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Codec(format!("ffmpeg error: {}", stderr.trim())));
        }
        Ok(())
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Codec(format!("non UTF-8 path {}", path.display())))
}

impl VideoCodec for FfmpegCodec {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn media_type(&self) -> &'static str {
        "video/mp4"
    }

    fn encode(&self, frames: &[RgbImage], path: &Path, fps: u32) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Codec("cannot encode an empty frame sequence".into()));
        }

        let staging = tempfile::tempdir()?;
        for (i, frame) in frames.iter().enumerate() {
            frame.save(staging.path().join(format!("frame_{i:05}.png")))?;
        }

        let pattern = staging.path().join("frame_%05d.png");
        let fps = fps.max(1).to_string();
        let crf = self.crf.to_string();
        self.run(&[
            "-framerate",
            fps.as_str(),
            "-i",
            path_str(&pattern)?,
            "-c:v",
            "libx264",
            "-crf",
            crf.as_str(),
            // yuv420p needs even sides
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-pix_fmt",
            "yuv420p",
            path_str(path)?,
        ])
    }

    fn decode(&self, path: &Path) -> Result<Vec<RgbImage>> {
        let staging = tempfile::tempdir()?;
        let pattern = staging.path().join("frame_%05d.png");
        self.run(&["-i", path_str(path)?, path_str(&pattern)?])?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(staging.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::Codec("ffmpeg produced no frames".into()));
        }

        files
            .iter()
            .map(|file| Ok(image::open(file)?.into_rgb8()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, shift: u8) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 8) as u8, (y * 8) as u8, shift])
        })
    }

    #[test]
    fn test_gif_keeps_frame_count_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        let frames: Vec<RgbImage> = (0..3).map(|i| gradient(32, 16, i * 80)).collect();

        GifCodec.encode(&frames, &path, 30).unwrap();
        let decoded = GifCodec.decode(&path).unwrap();

        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().all(|f| f.dimensions() == (32, 16)));
    }

    #[test]
    fn test_gif_single_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.gif");
        GifCodec.encode(&[gradient(8, 8, 0)], &path, 1).unwrap();
        assert_eq!(GifCodec.decode(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_gif_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let err = GifCodec.encode(&[], &dir.path().join("x.gif"), 30).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_missing_ffmpeg_is_codec_error() {
        let codec = FfmpegCodec::new("/nonexistent/ffmpeg-binary");
        assert!(!codec.is_available());

        let dir = tempfile::tempdir().unwrap();
        let err = codec
            .encode(&[gradient(8, 8, 0)], &dir.path().join("out.mp4"), 30)
            .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_ffmpeg_single_frame_when_installed() {
        let codec = FfmpegCodec::default();
        if !codec.is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.mp4");
        codec.encode(&[gradient(32, 32, 10)], &path, 1).unwrap();
        let frames = codec.decode(&path).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dimensions(), (32, 32));
    }
}
