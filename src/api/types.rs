//! API request envelope types.
//!
//! The wire format follows the chat client's camelCase field names; the
//! conversions at the bottom translate into the engine's internal types.

use serde::Deserialize;

use crate::llm::{AppConfig, ChatMessage, ModelParams, ModelSpec};

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u64 {
    4096
}

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Ordered conversation history; must end with a user turn.
    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    pub data: RequestData,
}

/// The request's `data` object.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestData {
    /// Thinking mode id; unknown or missing ids run the standard pipeline.
    pub agent_mode: Option<String>,

    /// Conversation-level system prompt.
    pub system_prompt: Option<String>,

    /// The user's model roster; only enabled entries participate.
    pub model_settings: Vec<ModelSetting>,

    pub app_settings: AppSettings,

    /// Sum of history content lengths, reported by the client to trigger
    /// summarisation without re-measuring server-side.
    pub total_content_length: usize,
}

impl RequestData {
    /// Specs of the enabled models, in roster order.
    pub fn enabled_specs(&self) -> Vec<ModelSpec> {
        self.model_settings
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .map(ModelSpec::from)
            .collect()
    }
}

/// One entry of the user's model roster.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSetting {
    pub id: String,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub role: Option<String>,
}

impl From<ModelSetting> for ModelSpec {
    fn from(setting: ModelSetting) -> Self {
        ModelSpec {
            id: setting.id,
            model_name: setting.model_name,
            temperature: setting.temperature,
            max_output_tokens: setting.max_tokens,
            enabled: setting.enabled,
            role: setting.role,
        }
    }
}

/// Auxiliary model settings from the settings form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub summarizer_model: Option<AuxModelSetting>,
    pub integrator_model: Option<AuxModelSetting>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxModelSetting {
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

impl AuxModelSetting {
    fn to_params(&self) -> ModelParams {
        ModelParams {
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
        }
    }
}

impl AppSettings {
    /// Resolve to concrete parameters, defaulting missing entries.
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            summarizer: self
                .summarizer_model
                .as_ref()
                .map(AuxModelSetting::to_params)
                .unwrap_or_else(ModelParams::summarizer_default),
            integrator: self
                .integrator_model
                .as_ref()
                .map(AuxModelSetting::to_params)
                .unwrap_or_else(ModelParams::integrator_default),
        }
    }
}
