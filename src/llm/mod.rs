//! LLM client module for interacting with backend language models.
//!
//! This module provides a trait-based abstraction over the upstream chat
//! completions API, with Cerebras as the primary implementation. Both a
//! buffered flavour (whole reply as a string) and a token-streaming flavour
//! (tokens forwarded to the client stream while being accumulated) are
//! exposed, since the engine mixes the two: meta calls (planning, routing,
//! summarisation) buffer, final-answer integration streams.

mod cerebras;
pub mod error;

pub use cerebras::{CerebrasClient, PROVIDER};
pub use error::{classify_status, ApiError, Disposition};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::StreamSink;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A model participating in a fan-out.
///
/// `id` is opaque and only has to be unique within one request; virtual
/// duplicates (the same backend model assigned several subtasks) get
/// distinct ids derived from the base id.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_output_tokens: u64,
    pub enabled: bool,
    /// Free-form label, used as a persona hint by the expert-team step.
    pub role: Option<String>,
}

/// A single model's contribution to the answer, as shown in the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelReply {
    /// Display label (the backend model name).
    pub model: String,
    pub provider: String,
    pub content: String,
    /// Populated only by chain-of-thought parsing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Originating spec id, set by fan-outs so downstream steps can pair
    /// replies with their tasks even when siblings failed. Server-side
    /// only, never serialized.
    #[serde(skip)]
    pub id: Option<String>,
}

impl ModelReply {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: PROVIDER.to_string(),
            content: content.into(),
            thought: None,
            id: None,
        }
    }
}

/// Default backend model for the auxiliary roles (summariser, integrator,
/// planner, router) when the request does not configure one.
pub const DEFAULT_AUX_MODEL: &str = "llama-3.3-70b";

/// Parameters for an auxiliary model role.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model_name: String,
    pub temperature: f64,
    pub max_output_tokens: u64,
}

impl ModelParams {
    pub fn integrator_default() -> Self {
        Self {
            model_name: DEFAULT_AUX_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }

    pub fn summarizer_default() -> Self {
        Self {
            model_name: DEFAULT_AUX_MODEL.to_string(),
            temperature: 0.3,
            max_output_tokens: 4096,
        }
    }

    /// Promote the parameters to a full spec for executor calls.
    pub fn to_spec(&self, id: &str) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            enabled: true,
            role: None,
        }
    }
}

/// Per-request auxiliary model configuration.
///
/// The integrator model doubles as planner, router, persona generator,
/// hypothesis generator and meta-analyser.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub summarizer: ModelParams,
    pub integrator: ModelParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            summarizer: ModelParams::summarizer_default(),
            integrator: ModelParams::integrator_default(),
        }
    }
}

/// Trait for LLM clients.
///
/// Implementations surface every failure as an [`ApiError`] carrying the
/// HTTP status (500 for transport problems), the key used and the model
/// name, so the executors can classify it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one call and accumulate the whole reply into a string.
    async fn call_buffered(
        &self,
        key: &str,
        spec: &ModelSpec,
        messages: &[ChatMessage],
    ) -> Result<String, ApiError>;

    /// Run one call, forwarding each token to `sink` as a `DATA` frame while
    /// accumulating it. Returns the accumulated text on normal completion.
    async fn call_streaming(
        &self,
        key: &str,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        sink: &StreamSink,
    ) -> Result<String, ApiError>;
}
