//! Agent execution context - per-request state threaded through steps.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agents::registry::AgentMode;
use crate::exec::{IntegrationExecutor, ParallelExecutor};
use crate::keypool::KeyPool;
use crate::llm::{AppConfig, ChatMessage, LlmClient, ModelReply, ModelSpec, Role};
use crate::stream::StreamSink;

/// Shared context passed through the pipeline steps of one request.
///
/// The inputs are set once by the orchestrator; the output slots are filled
/// progressively as steps run. Steps execute sequentially, so plain mutable
/// access is enough; the key pool is the only state shared with concurrent
/// tasks and synchronises internally.
pub struct AgentContext {
    /// Request-scoped rotating key pool.
    pub pool: Arc<KeyPool>,

    /// Backend LLM client.
    pub client: Arc<dyn LlmClient>,

    /// Current conversation history. Always ends with the user turn when an
    /// inference step runs; the summariser may compress the prefix.
    pub messages: Vec<ChatMessage>,

    /// Models participating in fan-outs, in request order.
    pub enabled_models: Vec<ModelSpec>,

    /// Summariser/integrator model parameters.
    pub app_config: AppConfig,

    /// Write side of the response stream.
    pub sink: StreamSink,

    /// Cancelled when the client disconnects.
    pub cancel: CancellationToken,

    /// Sum of history content lengths, reported by the client.
    pub total_content_length: usize,

    /// The selected thinking mode.
    pub mode: AgentMode,

    /// Conversation-level system prompt, prepended by the orchestrator.
    pub system_prompt: Option<String>,

    /// Primary fan-out results.
    pub parallel_responses: Vec<ModelReply>,

    /// Secondary fan-out results (critiques, emotion analysis).
    pub critiques: Vec<ModelReply>,

    /// Planned subtask prompts.
    pub sub_tasks: Vec<String>,

    /// Whether `sub_tasks` holds hypotheses rather than subtasks.
    pub is_hypothesis: bool,

    /// The final synthesised answer.
    pub final_content: String,

    /// Replies the UI should display; defaults to `parallel_responses`.
    pub model_responses: Option<Vec<ModelReply>>,

    /// Whether the summariser replaced the history.
    pub summary_executed: bool,

    /// Synthetic history prefix produced by the summariser.
    pub new_history_context: Vec<ChatMessage>,

    /// Whether a step already streamed `final_content` as `DATA` frames.
    pub final_content_streamed: bool,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<KeyPool>,
        client: Arc<dyn LlmClient>,
        sink: StreamSink,
        mode: AgentMode,
        messages: Vec<ChatMessage>,
        enabled_models: Vec<ModelSpec>,
        app_config: AppConfig,
        system_prompt: Option<String>,
        total_content_length: usize,
    ) -> Self {
        let cancel = sink.cancel_token();
        Self {
            pool,
            client,
            messages,
            enabled_models,
            app_config,
            sink,
            cancel,
            total_content_length,
            mode,
            system_prompt,
            parallel_responses: Vec::new(),
            critiques: Vec::new(),
            sub_tasks: Vec::new(),
            is_hypothesis: false,
            final_content: String::new(),
            model_responses: None,
            summary_executed: false,
            new_history_context: Vec::new(),
            final_content_streamed: false,
        }
    }

    /// Fan-out executor over this request's pool and client.
    pub fn parallel(&self) -> ParallelExecutor<'_> {
        ParallelExecutor::new(&self.pool, self.client.as_ref(), &self.cancel)
    }

    /// Integration executor over this request's pool and client.
    pub fn integration(&self) -> IntegrationExecutor<'_> {
        IntegrationExecutor::new(&self.pool, self.client.as_ref(), &self.cancel)
    }

    /// Content of the most recent user turn, or an empty string.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Whether the client has gone away.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
