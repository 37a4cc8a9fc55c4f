use image::RgbImage;

/// Conditioning video pinned to a position in the generated timeline
#[derive(Debug, Clone)]
pub struct Condition {
    pub video: Vec<RgbImage>,
    pub frame_index: u32,
}

impl Condition {
    pub fn new(video: Vec<RgbImage>, frame_index: u32) -> Self {
        Self { video, frame_index }
    }

    pub fn first_frame(&self) -> Option<&RgbImage> {
        self.video.first()
    }
}
