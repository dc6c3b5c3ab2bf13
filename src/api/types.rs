//! Request and response bodies of the backend HTTP API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::params::PipelineParameterUpdate;

pub const OFFER_PATH: &str = "/api/v1/webrtc/offer";
pub const PIPELINE_LOAD_PATH: &str = "/api/v1/pipeline/load";
pub const PIPELINE_STATUS_PATH: &str = "/api/v1/pipeline/status";
pub const PIPELINE_UPDATE_PATH: &str = "/api/v1/pipeline/update";
pub const MODELS_STATUS_PATH: &str = "/api/v1/models/status";
pub const MODELS_DOWNLOAD_PATH: &str = "/api/v1/models/download";
pub const HARDWARE_INFO_PATH: &str = "/api/v1/hardware/info";

/// SDP offer sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcOfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(
        rename = "initialParameters",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_parameters: Option<PipelineParameterUpdate>,
}

/// Session description returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadPipelineRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_params: Option<Value>,
}

/// Generic `{message}` acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Pipeline lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    NotLoaded,
    Loading,
    Loaded,
    Error,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::NotLoaded => write!(f, "not_loaded"),
            PipelineStatus::Loading => write!(f, "loading"),
            PipelineStatus::Loaded => write!(f, "loaded"),
            PipelineStatus::Error => write!(f, "error"),
            PipelineStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatusResponse {
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatusResponse {
    pub downloaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadModelsRequest {
    pub pipeline_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfoResponse {
    /// Total GPU memory, absent when the backend has no GPU
    #[serde(default)]
    pub vram_gb: Option<f64>,
}
