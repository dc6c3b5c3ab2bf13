use serde::{Deserialize, Serialize};

use crate::webrtc::config::WebRtcConfig;

/// Default backend address (inference server HTTP API)
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Inference backend settings
    pub backend: BackendConfig,
    /// Media relay settings
    pub relay: RelayConfig,
    /// WebRTC settings
    pub webrtc: WebRtcConfig,
    /// Pipeline orchestration settings
    pub pipeline: PipelineConfig,
}

impl ClientConfig {
    /// Apply `RTGEN_*` environment overrides on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_non_empty("RTGEN_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(url) = env_non_empty("RTGEN_RELAY_URL") {
            self.relay.base_url = Some(url);
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API
    pub base_url: String,
    /// Per-request timeout in seconds (0 disables)
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Media relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the relay service. Relay transport is unavailable when unset.
    pub base_url: Option<String>,
    /// Use relay transport by default for `stream`
    pub use_by_default: bool,
}

/// Pipeline orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline loaded when none is given explicitly
    pub default_pipeline_id: Option<String>,
    /// Status polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// How long to wait for a pipeline to finish loading
    pub load_timeout_secs: u64,
    /// How long to wait for model downloads
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_pipeline_id: None,
            poll_interval_ms: 1000,
            load_timeout_secs: 300,
            download_timeout_secs: 3600,
        }
    }
}
