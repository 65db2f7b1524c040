//! Buffered meta-steps: subtask planning, hypothesis generation, routing.
//!
//! All three run a single buffered call on the integrator model and never
//! touch the stream; their outputs steer the fan-out steps that follow.

use crate::agents::context::AgentContext;
use crate::agents::steps::{parse_string_array, StepError};
use crate::llm::ChatMessage;

async fn run_meta(ctx: &AgentContext, prompt: String) -> Result<String, StepError> {
    let params = ctx.app_config.integrator.clone();
    let messages = vec![ChatMessage::user(prompt)];
    Ok(ctx.integration().run_buffered(&params, &messages).await?)
}

/// Plan actionable subtasks for the manager pipeline.
///
/// A reply that fails to parse as a JSON array is demoted to a
/// single-element plan holding the raw text.
pub(super) async fn subtasks(ctx: &mut AgentContext) -> Result<(), StepError> {
    let prompt = format!(
        "あなたはタスクプランナーです。次の質問に答えるために必要な、実行可能なサブタスクを洗い出してください。\n\
         JSON の文字列配列のみを出力してください。説明文やコードフェンスは不要です。\n\n質問:\n{}",
        ctx.last_user_content()
    );
    let raw = run_meta(ctx, prompt).await?;
    ctx.sub_tasks = parse_string_array(&raw).unwrap_or_else(|| {
        tracing::warn!("subtask plan is not a JSON array, demoting to raw text");
        vec![raw.trim().to_string()]
    });
    tracing::debug!(count = ctx.sub_tasks.len(), "planned subtasks");
    Ok(())
}

/// Generate exactly three competing interpretations of the question.
pub(super) async fn hypotheses(ctx: &mut AgentContext) -> Result<(), StepError> {
    let prompt = format!(
        "次の質問について、考えられる解釈をちょうど3つ挙げてください。\n\
         JSON の文字列配列のみを出力してください。説明文やコードフェンスは不要です。\n\n質問:\n{}",
        ctx.last_user_content()
    );
    let raw = run_meta(ctx, prompt).await?;
    ctx.sub_tasks = parse_string_array(&raw).unwrap_or_else(|| {
        tracing::warn!("hypothesis list is not a JSON array, demoting to raw text");
        vec![raw.trim().to_string()]
    });
    ctx.is_hypothesis = true;
    Ok(())
}

/// Derive a strategic system instruction and prepend it to the history.
/// Runs no inference fan-out itself.
pub(super) async fn router(ctx: &mut AgentContext) -> Result<(), StepError> {
    let prompt = format!(
        "あなたはルーティング戦略家です。次の質問の性質(事実確認・創作・分析・雑談など)を見極め、\
         回答チーム全体へ与える戦略的な指示を作成してください。\
         システムプロンプトとしてそのまま使える指示文のみを出力してください。\n\n質問:\n{}",
        ctx.last_user_content()
    );
    let instruction = run_meta(ctx, prompt).await?;
    ctx.messages.insert(0, ChatMessage::system(instruction));
    Ok(())
}
