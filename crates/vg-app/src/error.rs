use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use crate::backend::ErrorResponse;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Generation(#[from] vg_core::error::Error),

    #[error("Invalid form data: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        use vg_core::error::Error;

        match self {
            AppError::Generation(Error::Input(_)) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(Error::ResourceExhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Generation(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Multipart(e) => e.status(),
        }
    }

    pub fn kind(&self) -> &'static str {
        use vg_core::error::Error;

        match self {
            AppError::Generation(Error::Input(_))
            | AppError::BadRequest(_)
            | AppError::Multipart(_) => "input",
            AppError::Generation(Error::ResourceExhausted { .. }) => "resource_exhausted",
            AppError::Generation(Error::PipelineStage { .. }) => "pipeline_stage",
            AppError::Generation(Error::Postprocess { .. }) => "postprocess",
            AppError::Generation(_) | AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        } else {
            tracing::warn!(kind = self.kind(), "{}", self);
        }

        let body = Json(ErrorResponse {
            status: "error",
            kind: self.kind(),
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use vg_core::error::{Error, Stage};
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::from(Error::Input("bad".into())), StatusCode::BAD_REQUEST, "input"),
            (
                AppError::from(Error::ResourceExhausted { stage: Stage::Refine, message: "oom".into() }),
                StatusCode::SERVICE_UNAVAILABLE,
                "resource_exhausted",
            ),
            (
                AppError::from(Error::PipelineStage { stage: Stage::LowresGenerate, message: "x".into() }),
                StatusCode::INTERNAL_SERVER_ERROR,
                "pipeline_stage",
            ),
            (
                AppError::from(Error::Postprocess { stage: Stage::Encode, message: "x".into() }),
                StatusCode::INTERNAL_SERVER_ERROR,
                "postprocess",
            ),
            (AppError::BadRequest("no image".into()), StatusCode::BAD_REQUEST, "input"),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.kind(), kind, "{err}");
        }
    }
}
