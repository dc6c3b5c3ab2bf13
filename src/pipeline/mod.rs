//! Pipeline lifecycle helpers
//!
//! [`PipelineController`] wraps the raw API calls with the polling loops the
//! client needs before it can stream: make sure the models are on disk, load
//! the pipeline, and wait until the backend reports it as loaded.

pub mod params;

pub use params::{InterpolationMethod, PipelineParameterUpdate, PromptItem, PromptTransition};

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, LoadPipelineRequest, PipelineStatus, PipelineStatusResponse};
use crate::config::PipelineConfig;
use crate::error::{AppError, Result};

/// Model download / pipeline load orchestration
#[derive(Debug, Clone)]
pub struct PipelineController {
    api: ApiClient,
    poll_interval: Duration,
    load_timeout: Duration,
    download_timeout: Duration,
}

impl PipelineController {
    pub fn new(api: ApiClient, config: &PipelineConfig) -> Self {
        Self {
            api,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    /// Make sure the models of `pipeline_id` are downloaded
    ///
    /// Returns `false` if they were already present, `true` if a download
    /// was started and completed.
    pub async fn ensure_models(&self, pipeline_id: &str) -> Result<bool> {
        if self.api.check_model_status(pipeline_id).await?.decode()?.downloaded {
            info!("Models for {} already downloaded, skipping download", pipeline_id);
            return Ok(false);
        }

        info!("Downloading models for {}", pipeline_id);
        let ack = self.api.download_pipeline_models(pipeline_id).await?.decode()?;
        debug!("Download accepted: {}", ack.message);

        let deadline = Instant::now() + self.download_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.api.check_model_status(pipeline_id).await?.decode()?.downloaded {
                info!("Model download for {} completed", pipeline_id);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Err(AppError::Timeout(format!(
                    "models for {} not downloaded after {:?}",
                    pipeline_id, self.download_timeout
                )));
            }
        }
    }

    /// Load a pipeline and wait until the backend reports it as loaded
    pub async fn load_and_wait(
        &self,
        pipeline_id: Option<&str>,
        load_params: Option<Value>,
    ) -> Result<PipelineStatusResponse> {
        let request = LoadPipelineRequest {
            pipeline_id: pipeline_id.map(str::to_string),
            load_params,
        };
        let ack = self.api.load_pipeline(&request).await?.decode()?;
        info!("Pipeline load requested: {}", ack.message);

        self.wait_until_loaded().await
    }

    /// Poll the pipeline status until it is loaded, failed or timed out
    pub async fn wait_until_loaded(&self) -> Result<PipelineStatusResponse> {
        let deadline = Instant::now() + self.load_timeout;
        let mut last = None;

        loop {
            let status = self.api.get_pipeline_status().await?.decode()?;
            if last != Some(status.status) {
                debug!("Pipeline status: {}", status.status);
                last = Some(status.status);
            }

            match status.status {
                PipelineStatus::Loaded => return Ok(status),
                PipelineStatus::Error => {
                    let reason = status
                        .error
                        .unwrap_or_else(|| "pipeline failed to load".to_string());
                    warn!("Pipeline load failed: {}", reason);
                    return Err(AppError::Pipeline(reason));
                }
                PipelineStatus::NotLoaded | PipelineStatus::Loading | PipelineStatus::Unknown => {}
            }

            if Instant::now() >= deadline {
                return Err(AppError::Timeout(format!(
                    "pipeline not loaded after {:?}",
                    self.load_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
