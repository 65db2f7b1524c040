//! Per-request pipeline driver.
//!
//! Runs the summarisation pre-step, prepends the conversation-level system
//! prompt, then iterates the selected mode's steps. Once the stream is open
//! every failure surfaces as an `ERROR` frame rather than an HTTP status;
//! the transport has already committed to a 200 by then. A disconnected
//! client silently ends the pipeline without further frames.

use crate::agents::{summarize, AgentContext, Step};
use crate::llm::ChatMessage;
use crate::stream::Frame;

/// Drive one request to its terminal frame.
pub async fn run(mut ctx: AgentContext) {
    tracing::info!(
        mode = ctx.mode.id(),
        models = ctx.enabled_models.len(),
        history = ctx.messages.len(),
        "pipeline start"
    );

    // Pre-step: compress long histories. Best-effort, never fatal.
    summarize::run(&mut ctx).await;
    if ctx.is_cancelled() {
        return;
    }

    // The conversation's system prompt heads the (possibly compressed)
    // history so every downstream call sees it first.
    if let Some(prompt) = ctx.system_prompt.clone().filter(|p| !p.trim().is_empty()) {
        ctx.messages.insert(0, ChatMessage::system(prompt));
    }

    for step in ctx.mode.steps() {
        // The pre-step already ran; the registry entry is declarative.
        if matches!(step, Step::Summarize) {
            continue;
        }
        if ctx.is_cancelled() {
            return;
        }
        ctx.sink.status(step.name());
        tracing::debug!(step = step.name(), "running step");
        if let Err(err) = step.run(&mut ctx).await {
            if err.is_cancelled() {
                tracing::info!(step = step.name(), "client disconnected, aborting pipeline");
                return;
            }
            tracing::error!(step = step.name(), error = %err, "pipeline step failed");
            ctx.sink.send(Frame::Error(err.to_string()));
            return;
        }
    }

    if !ctx.final_content_streamed && !ctx.final_content.is_empty() {
        ctx.sink.data(&ctx.final_content);
    }
    let replies = ctx
        .model_responses
        .clone()
        .unwrap_or_else(|| ctx.parallel_responses.clone());
    ctx.sink.send(Frame::ModelResponses(replies));
    tracing::info!(mode = ctx.mode.id(), "pipeline complete");
}
