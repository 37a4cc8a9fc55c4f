use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub base_model: String,
    pub upsampler_model: String,
    pub variant: String,
    pub placement: String,
    pub device: String,
    pub media_type: &'static str,
    /// Free slots in the generation gate
    pub available_slots: usize,
}
