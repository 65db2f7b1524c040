//! Integration steps: turn fan-out results into the streamed final answer.
//!
//! Every step here owns the stream sink for its duration; the integrator's
//! tokens are forwarded as `DATA` frames while being accumulated into
//! `final_content`.

use crate::agents::context::AgentContext;
use crate::agents::steps::{numbered_replies, StepError};
use crate::llm::{ChatMessage, ModelReply};

/// Replace the last user turn with the integration prompt and stream the
/// integrator's answer.
async fn stream_integration(ctx: &mut AgentContext, prompt: String) -> Result<(), StepError> {
    let mut messages: Vec<ChatMessage> =
        ctx.messages[..ctx.messages.len().saturating_sub(1)].to_vec();
    messages.push(ChatMessage::user(prompt));

    let params = ctx.app_config.integrator.clone();
    let sink = ctx.sink.clone();
    let text = ctx
        .integration()
        .run_streaming(&params, &messages, &sink)
        .await?;
    ctx.final_content = text;
    ctx.final_content_streamed = true;
    Ok(())
}

/// Synthesise the answer from the primary fan-out results.
///
/// A single reply needs no synthesis and is streamed as-is.
pub(super) async fn standard(ctx: &mut AgentContext) -> Result<(), StepError> {
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }
    ctx.model_responses = Some(ctx.parallel_responses.clone());

    if ctx.parallel_responses.len() == 1 {
        let content = ctx.parallel_responses[0].content.clone();
        ctx.sink.data(&content);
        ctx.final_content = content;
        ctx.final_content_streamed = true;
        return Ok(());
    }

    let prompt = format!(
        "元の質問:\n{}\n\n各モデルの回答:\n{}\n\n\
         上記の回答を統合し、最も正確で完全な最終回答を作成してください。最終回答のみを出力してください。",
        ctx.last_user_content(),
        numbered_replies(&ctx.parallel_responses)
    );
    stream_integration(ctx, prompt).await
}

fn numbered_with_thoughts(replies: &[ModelReply]) -> String {
    replies
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {}:\n[思考]\n{}\n[回答]\n{}",
                i + 1,
                r.model,
                r.thought.as_deref().unwrap_or("(なし)"),
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Synthesise from chain-of-thought replies. Always runs the integrator so
/// the final answer reflects the thoughts as well as the answers.
pub(super) async fn deep_thought(ctx: &mut AgentContext) -> Result<(), StepError> {
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }
    ctx.model_responses = Some(ctx.parallel_responses.clone());

    let prompt = format!(
        "元の質問:\n{}\n\n各モデルの思考過程と回答:\n{}\n\n\
         それぞれの思考過程も踏まえて回答を統合し、最も正確で完全な最終回答を作成してください。最終回答のみを出力してください。",
        ctx.last_user_content(),
        numbered_with_thoughts(&ctx.parallel_responses)
    );
    stream_integration(ctx, prompt).await
}

/// Final-editor pass: apply every critique to the drafts. The UI gets both
/// the drafts and the critiques.
pub(super) async fn with_critiques(ctx: &mut AgentContext) -> Result<(), StepError> {
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }
    let mut shown = ctx.parallel_responses.clone();
    shown.extend(ctx.critiques.iter().cloned());
    ctx.model_responses = Some(shown);

    let prompt = format!(
        "元の質問:\n{}\n\n回答草稿:\n{}\n\n批評:\n{}\n\n\
         あなたは最終編集者です。すべての批評を反映して草稿を磨き上げ、最終回答を作成してください。最終回答のみを出力してください。",
        ctx.last_user_content(),
        numbered_replies(&ctx.parallel_responses),
        numbered_replies(&ctx.critiques)
    );
    stream_integration(ctx, prompt).await
}

/// Synthesise a report from per-subtask (or per-hypothesis) results.
pub(super) async fn report(ctx: &mut AgentContext) -> Result<(), StepError> {
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }
    ctx.model_responses = Some(ctx.parallel_responses.clone());

    let label = if ctx.is_hypothesis { "解釈" } else { "サブタスク" };
    let pairs = report_pairs(&ctx.sub_tasks, &ctx.parallel_responses, label);

    let prompt = format!(
        "元の質問:\n{}\n\n各{label}と実行結果:\n{}\n\n\
         上記の結果を統合し、質問に対する包括的な最終回答を作成してください。最終回答のみを出力してください。",
        ctx.last_user_content(),
        pairs
    );
    stream_integration(ctx, prompt).await
}

/// Pair each surviving reply with its subtask via the originating virtual
/// spec id. A failed subtask in the middle of the plan must not shift the
/// later pairs, so positional zipping is not enough.
fn report_pairs(sub_tasks: &[String], replies: &[ModelReply], label: &str) -> String {
    replies
        .iter()
        .enumerate()
        .map(|(i, reply)| {
            let task = reply
                .id
                .as_deref()
                .and_then(super::execute::subtask_index)
                .and_then(|index| sub_tasks.get(index))
                .map(String::as_str)
                .unwrap_or("(不明)");
            format!("{}. {label}: {}\n   回答: {}", i + 1, task, reply.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Rewrite the drafts in the tone reported by the analyser.
pub(super) async fn with_emotion(ctx: &mut AgentContext) -> Result<(), StepError> {
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }
    ctx.model_responses = Some(ctx.parallel_responses.clone());

    let analysis = ctx
        .critiques
        .first()
        .map(|r| r.content.clone())
        .unwrap_or_else(|| "(分析なし)".to_string());

    let prompt = format!(
        "元の質問:\n{}\n\n感情・口調の分析:\n{}\n\n回答草稿:\n{}\n\n\
         分析された感情と口調に寄り添うように草稿を書き直し、最終回答を作成してください。最終回答のみを出力してください。",
        ctx.last_user_content(),
        analysis,
        numbered_replies(&ctx.parallel_responses)
    );
    stream_integration(ctx, prompt).await
}
