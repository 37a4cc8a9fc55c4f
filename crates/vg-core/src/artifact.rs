use std::path::Path;
use tempfile::TempPath;
use crate::dimensions::Dimensions;
use crate::error::Result;

/// Fresh temporary file path, removed when the returned handle drops.
pub fn scratch_path(extension: &str) -> Result<TempPath> {
    let suffix = format!(".{extension}");
    let file = tempfile::Builder::new()
        .prefix("vidgen-")
        .suffix(&suffix)
        .tempfile()?;
    Ok(file.into_temp_path())
}

/// Encoded result file. Deleted exactly once, when the last owner drops it.
#[derive(Debug)]
pub struct ResultArtifact {
    path: TempPath,
    media_type: &'static str,
    dimensions: Dimensions,
    frame_count: usize,
    fps: u32,
}

impl ResultArtifact {
    pub fn new(
        path: TempPath,
        media_type: &'static str,
        dimensions: Dimensions,
        frame_count: usize,
        fps: u32,
    ) -> Self {
        Self {
            path,
            media_type,
            dimensions,
            frame_count,
            fps,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_removed_on_drop() {
        let path = scratch_path("bin").unwrap();
        std::fs::write(&path, b"video").unwrap();
        let artifact = ResultArtifact::new(path, "video/mp4", Dimensions::new(8, 8), 1, 1);
        let on_disk = artifact.path().to_path_buf();
        assert!(on_disk.exists());
        assert!(on_disk.to_string_lossy().ends_with(".bin"));

        drop(artifact);
        assert!(!on_disk.exists());
    }
}
