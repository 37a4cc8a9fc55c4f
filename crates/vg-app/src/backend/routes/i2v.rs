use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::Response;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::info;
use uuid::Uuid;
use vg_core::artifact::ResultArtifact;
use vg_core::request::{GenerationParams, GenerationRequest};
use crate::backend::state::GenState;
use crate::error::AppError;

/// `POST /i2v`: multipart image plus text fields, answered with the encoded video
pub async fn image_to_video(
    State(state): State<Arc<GenState>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();

    let form = I2vForm::read(multipart).await?;
    // Image decode is CPU-bound, keep it off the executor
    let request = tokio::task::spawn_blocking(move || form.into_request())
        .await
        .map_err(|e| AppError::Internal(format!("image decode task failed: {e}")))??;
    request.params.validate()?;

    let (width, height) = request.image.dimensions();
    info!(
        %request_id,
        source = %format!("{width}x{height}"),
        num_frames = request.params.num_frames,
        seed = request.params.seed,
        "Accepted image-to-video request"
    );

    let artifact = state.generate(request_id, request).await?;
    stream_artifact(artifact).await
}

/// Raw multipart fields, before any decoding
#[derive(Debug, Default)]
struct I2vForm {
    image: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl I2vForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = I2vForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                form.image = Some(field.bytes().await?.to_vec());
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn into_request(mut self) -> Result<GenerationRequest, AppError> {
        let image = self
            .image
            .take()
            .ok_or_else(|| AppError::BadRequest("missing file field `image`".into()))?;
        let params = self.params()?;
        Ok(GenerationRequest::from_encoded(&image, params)?)
    }

    fn params(&mut self) -> Result<GenerationParams, AppError> {
        let mut params = GenerationParams::default();

        params.prompt = self
            .fields
            .remove("prompt")
            .ok_or_else(|| AppError::BadRequest("missing field `prompt`".into()))?;
        if let Some(negative) = self.fields.remove("negative_prompt") {
            params.negative_prompt = negative;
        }

        params.expected_width = self.parse("expected_width")?;
        params.expected_height = self.parse("expected_height")?;

        self.parse_into("max_dimension", &mut params.max_dimension)?;
        self.parse_into("downscale_factor", &mut params.downscale_factor)?;
        self.parse_into("num_frames", &mut params.num_frames)?;
        self.parse_into("steps_lowres", &mut params.steps_lowres)?;
        self.parse_into("steps_refine", &mut params.steps_refine)?;
        self.parse_into("denoise_strength", &mut params.denoise_strength)?;
        self.parse_into("decode_timestep", &mut params.decode_timestep)?;
        self.parse_into("image_cond_noise_scale", &mut params.image_cond_noise_scale)?;
        self.parse_into("fps", &mut params.fps)?;
        self.parse_into("seed", &mut params.seed)?;
        if let Some(scale) = self.parse("guidance_scale")? {
            params.guidance_scale = Some(scale);
        }

        Ok(params)
    }

    /// Blank values count as absent
    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.fields.get(key).map(|v| v.trim()) {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("invalid value for `{key}`: {value}"))),
        }
    }

    fn parse_into<T: FromStr>(&self, key: &str, slot: &mut T) -> Result<(), AppError> {
        if let Some(value) = self.parse(key)? {
            *slot = value;
        }
        Ok(())
    }
}

/// Stream the file back. The artifact rides along with the body stream and is
/// deleted when the body drops, whether fully sent or not.
async fn stream_artifact(artifact: ResultArtifact) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(artifact.path())
        .await
        .map_err(vg_core::error::Error::from)?;

    let media_type = artifact.media_type();
    let extension = artifact
        .path()
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string();

    let stream = ReaderStream::new(file).map(move |chunk| {
        let _artifact = &artifact;
        chunk
    });

    Response::builder()
        .header(header::CONTENT_TYPE, media_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"output.{extension}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("failed to build response: {e}")))
}
