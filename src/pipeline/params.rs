//! Live pipeline parameters
//!
//! A [`PipelineParameterUpdate`] is a partial record: every field is optional
//! and an absent field means "leave unchanged". Absent fields are never
//! serialized, so the same value is used as a data-channel message and as an
//! HTTP body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Default number of steps for a prompt transition
pub const DEFAULT_TRANSITION_STEPS: u32 = 4;

/// Prompt embedding interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    #[default]
    Linear,
    Slerp,
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationMethod::Linear => write!(f, "linear"),
            InterpolationMethod::Slerp => write!(f, "slerp"),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_transition_steps() -> u32 {
    DEFAULT_TRANSITION_STEPS
}

/// Weighted text prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptItem {
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl PromptItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: default_weight(),
        }
    }

    pub fn weighted(text: impl Into<String>, weight: f64) -> Self {
        Self {
            text: text.into(),
            weight,
        }
    }
}

/// Smooth transition towards a new set of prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTransition {
    pub target_prompts: Vec<PromptItem>,
    #[serde(default = "default_transition_steps")]
    pub num_steps: u32,
    #[serde(default)]
    pub temporal_interpolation_method: InterpolationMethod,
}

impl PromptTransition {
    pub fn new(target_prompts: Vec<PromptItem>) -> Self {
        Self {
            target_prompts,
            num_steps: DEFAULT_TRANSITION_STEPS,
            temporal_interpolation_method: InterpolationMethod::default(),
        }
    }
}

/// Partial update of the running pipeline's mutable controls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineParameterUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<PromptItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_interpolation_method: Option<InterpolationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<PromptTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoising_step_list: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    /// Keys this client does not model; forwarded as-is
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PipelineParameterUpdate {
    /// Update that replaces the prompt list with a single prompt
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompts: Some(vec![PromptItem::new(text)]),
            ..Default::default()
        }
    }

    /// Build an update from an arbitrary JSON object, dropping `null` fields
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(AppError::MalformedResponse(
                "parameter update must be a JSON object".to_string(),
            ));
        };
        let filtered: Map<String, Value> =
            map.into_iter().filter(|(_, v)| !v.is_null()).collect();
        Ok(serde_json::from_value(Value::Object(filtered))?)
    }

    /// True if the update carries no field at all
    pub fn is_empty(&self) -> bool {
        self.prompts.is_none()
            && self.prompt_interpolation_method.is_none()
            && self.transition.is_none()
            && self.denoising_step_list.is_none()
            && self.noise_scale.is_none()
            && self.noise_controller.is_none()
            && self.manage_cache.is_none()
            && self.reset_cache.is_none()
            && self.paused.is_none()
            && self.extra.values().all(Value::is_null)
    }

    /// Remove `null` entries from the pass-through map
    pub fn filtered(mut self) -> Self {
        self.extra.retain(|_, v| !v.is_null());
        self
    }

    /// Names of the fields that will be sent, for logging
    pub fn field_names(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}
