use std::sync::Arc;
use image::RgbImage;
use crate::artifact::scratch_path;
use crate::codec::VideoCodec;
use crate::condition::Condition;
use crate::error::{Error, Result};

/// Turns a still image into a one-frame video condition.
///
/// The conditioning path of the generator only takes video, so the image goes
/// through the codec once (1 fps, one frame) and comes back as frames.
pub struct SingleFrameAdapter {
    codec: Arc<dyn VideoCodec>,
}

impl SingleFrameAdapter {
    pub fn new(codec: Arc<dyn VideoCodec>) -> Self {
        Self { codec }
    }

    pub fn condition(&self, image: &RgbImage) -> Result<Condition> {
        let scratch = scratch_path(self.codec.extension())?;
        self.codec.encode(std::slice::from_ref(image), &scratch, 1)?;
        let video = self.codec.decode(&scratch)?;
        drop(scratch);

        if video.is_empty() {
            return Err(Error::Codec("conditioning video decoded to zero frames".into()));
        }

        Ok(Condition::new(video, 0))
    }
}
