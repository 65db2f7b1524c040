//! Fan-out steps: the parallel inference work of each pipeline.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::agents::context::AgentContext;
use crate::agents::steps::{numbered_replies, parse_string_array, StepError};
use crate::exec::{ExecError, FanoutMessages};
use crate::llm::ChatMessage;

fn require_models(ctx: &AgentContext) -> Result<(), StepError> {
    if ctx.enabled_models.is_empty() {
        Err(StepError::NoEnabledModels)
    } else {
        Ok(())
    }
}

/// Fan out the unchanged history to every enabled model.
pub(super) async fn standard(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;
    let messages = ctx.messages.clone();
    let replies = ctx
        .parallel()
        .run(&ctx.enabled_models, FanoutMessages::Shared(&messages))
        .await?;
    ctx.parallel_responses = replies;
    Ok(())
}

/// Draft pass of the critique pipeline. Same fan-out as `standard`; the
/// replies act as drafts for the critics.
pub(super) async fn generators(ctx: &mut AgentContext) -> Result<(), StepError> {
    standard(ctx).await
}

/// Generate one persona per enabled model, then fan out with a per-model
/// system message casting each model as its persona.
pub(super) async fn expert_team(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;
    let personas = generate_personas(ctx).await?;

    let mut overrides = HashMap::new();
    for (i, spec) in ctx.enabled_models.iter().enumerate() {
        let persona = &personas[i % personas.len()];
        let mut msgs = Vec::with_capacity(ctx.messages.len() + 1);
        msgs.push(ChatMessage::system(format!(
            "あなたは「{}」です。その専門家として、専門知識と独自の視点を活かして回答してください。",
            persona
        )));
        msgs.extend(ctx.messages.iter().cloned());
        overrides.insert(spec.id.clone(), msgs);
    }

    let replies = ctx
        .parallel()
        .run(&ctx.enabled_models, FanoutMessages::PerTask(&overrides))
        .await?;
    ctx.parallel_responses = replies;
    Ok(())
}

async fn generate_personas(ctx: &AgentContext) -> Result<Vec<String>, StepError> {
    let hints: Vec<&str> = ctx
        .enabled_models
        .iter()
        .filter_map(|m| m.role.as_deref())
        .collect();

    let mut prompt = format!(
        "次の質問に多角的に回答するため、{} 人の専門家ペルソナ(肩書きや専門分野)を考案してください。\n\
         JSON の文字列配列のみを出力してください。説明文やコードフェンスは不要です。\n\n質問:\n{}",
        ctx.enabled_models.len(),
        ctx.last_user_content()
    );
    if !hints.is_empty() {
        prompt.push_str(&format!("\n\n参考にする役割のヒント: {}", hints.join("、")));
    }

    let params = ctx.app_config.integrator.clone();
    let messages = vec![ChatMessage::user(prompt)];
    let raw = ctx.integration().run_buffered(&params, &messages).await?;

    Ok(parse_string_array(&raw).unwrap_or_else(|| {
        tracing::warn!("persona list is not a JSON array, falling back to role hints");
        if hints.is_empty() {
            vec!["多角的な視点を持つ専門家".to_string()]
        } else {
            hints.iter().map(|h| h.to_string()).collect()
        }
    }))
}

const DEEP_THOUGHT_FORMAT: &str = "回答は必ず次の形式に従ってください。\n\
[思考]ここに思考過程を記述します[/思考][最終回答]ここに最終回答を記述します\n\
タグを省略してはいけません。";

/// Fan out with a strict chain-of-thought format instruction, then split
/// each reply into its thought and answer parts.
pub(super) async fn deep_thought(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;
    let mut messages = ctx.messages.clone();
    messages.push(ChatMessage::system(DEEP_THOUGHT_FORMAT));

    let mut replies = ctx
        .parallel()
        .run(&ctx.enabled_models, FanoutMessages::Shared(&messages))
        .await?;
    for reply in &mut replies {
        let (content, thought) = parse_deep_thought(&reply.content);
        reply.content = content;
        reply.thought = Some(thought);
    }
    ctx.parallel_responses = replies;
    Ok(())
}

static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[思考\](.*?)\[/思考\]").expect("static regex"));
static ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[最終回答\](.*)\z").expect("static regex"));

const EXTRACTION_FAILED: &str = "(extraction failed)";

/// Split a chain-of-thought reply into `(content, thought)`.
///
/// When the answer tag is missing the whole reply counts as the answer.
pub(crate) fn parse_deep_thought(raw: &str) -> (String, String) {
    let thought = THOUGHT_RE.captures(raw).map(|c| c[1].trim().to_string());
    let answer = ANSWER_RE.captures(raw).map(|c| c[1].trim().to_string());
    match (answer, thought) {
        (Some(answer), Some(thought)) => (answer, thought),
        (Some(answer), None) => (answer, EXTRACTION_FAILED.to_string()),
        (None, Some(thought)) => (raw.trim().to_string(), thought),
        (None, None) => (raw.trim().to_string(), EXTRACTION_FAILED.to_string()),
    }
}

/// Fan out a critique request over the drafts in `parallel_responses`.
pub(super) async fn critics(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;
    if ctx.parallel_responses.is_empty() {
        return Err(StepError::NoResponses);
    }

    let prompt = format!(
        "元の質問:\n{}\n\n各モデルの回答草稿:\n{}\n\n\
         上記の草稿を批評してください。誤り・不足・改善点を具体的に指摘してください。",
        ctx.last_user_content(),
        numbered_replies(&ctx.parallel_responses)
    );
    let messages = vec![ChatMessage::user(prompt)];
    let replies = ctx
        .parallel()
        .run(&ctx.enabled_models, FanoutMessages::Shared(&messages))
        .await?;
    ctx.critiques = replies;
    Ok(())
}

const SUBTASK_ID_MARKER: &str = "__subtask_";

/// Virtual spec id for subtask `index` on top of `base`.
pub(super) fn subtask_id(base: &str, index: usize) -> String {
    format!("{base}{SUBTASK_ID_MARKER}{index}")
}

/// Recover the subtask index from a virtual spec id.
pub(super) fn subtask_index(id: &str) -> Option<usize> {
    id.rsplit_once(SUBTASK_ID_MARKER)?.1.parse().ok()
}

/// Distribute the planned subtasks round-robin over the enabled models.
///
/// One model may carry several subtasks, so virtual spec copies with
/// derived ids keep the per-task prompts apart; the ids come back on the
/// replies, letting the report step pair each answer with its subtask.
pub(super) async fn subtasks(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;
    if ctx.sub_tasks.is_empty() {
        return Err(StepError::NoSubtasks);
    }

    let question = ctx.last_user_content().to_string();
    let label = if ctx.is_hypothesis { "解釈" } else { "サブタスク" };

    let mut virtual_specs = Vec::with_capacity(ctx.sub_tasks.len());
    let mut overrides = HashMap::new();
    for (index, task) in ctx.sub_tasks.iter().enumerate() {
        let base = &ctx.enabled_models[index % ctx.enabled_models.len()];
        let mut spec = base.clone();
        spec.id = subtask_id(&base.id, index);

        let mut msgs = ctx.messages.clone();
        msgs.pop();
        msgs.push(ChatMessage::user(format!(
            "元の質問:\n{question}\n\nあなたの担当{label}:\n{task}\n\nこの{label}にのみ集中して回答してください。"
        )));
        overrides.insert(spec.id.clone(), msgs);
        virtual_specs.push(spec);
    }

    let replies = ctx
        .parallel()
        .run(&virtual_specs, FanoutMessages::PerTask(&overrides))
        .await?;
    ctx.parallel_responses = replies;
    Ok(())
}

/// Run the tone analyser and the answer fan-out concurrently.
///
/// The analyser (first enabled model) reports `{emotion, tone}` into the
/// critiques slot; the answer fan-out fills `parallel_responses`. When the
/// answer side comes back empty the analyser output doubles as the answer.
pub(super) async fn emotion_analysis(ctx: &mut AgentContext) -> Result<(), StepError> {
    require_models(ctx)?;

    let analyser_specs = vec![ctx.enabled_models[0].clone()];
    let analysis_prompt = vec![ChatMessage::user(format!(
        "次のユーザー発言の感情と口調を分析し、{{\"emotion\": \"...\", \"tone\": \"...\"}} 形式の JSON のみを出力してください。\n\n発言:\n{}",
        ctx.last_user_content()
    ))];
    let history = ctx.messages.clone();

    let (analysis, answers) = {
        let analyser = ctx.parallel();
        let responder = ctx.parallel();
        tokio::join!(
            analyser.run(&analyser_specs, FanoutMessages::Shared(&analysis_prompt)),
            responder.run(&ctx.enabled_models, FanoutMessages::Shared(&history)),
        )
    };

    if matches!(analysis, Err(ExecError::Cancelled)) || matches!(answers, Err(ExecError::Cancelled))
    {
        return Err(ExecError::Cancelled.into());
    }

    match (analysis, answers) {
        (Ok(analysis), Ok(answers)) => {
            ctx.critiques = analysis;
            ctx.parallel_responses = answers;
        }
        (Ok(analysis), Err(_)) => {
            tracing::warn!("answer fan-out failed, using analyser output as the answer");
            ctx.parallel_responses = analysis.clone();
            ctx.critiques = analysis;
        }
        (Err(_), Ok(answers)) => {
            tracing::warn!("emotion analysis failed, continuing with plain answers");
            ctx.parallel_responses = answers;
        }
        (Err(err), Err(_)) => return Err(err.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_format() {
        let (content, thought) = parse_deep_thought("[思考]plan[/思考][最終回答]answer");
        assert_eq!(content, "answer");
        assert_eq!(thought, "plan");
    }

    #[test]
    fn test_parse_untagged_reply() {
        let (content, thought) = parse_deep_thought("raw");
        assert_eq!(content, "raw");
        assert_eq!(thought, "(extraction failed)");
    }

    #[test]
    fn test_parse_thought_without_answer() {
        let raw = "[思考]考え中[/思考]まとめの文章";
        let (content, thought) = parse_deep_thought(raw);
        // Answer tag missing: the whole reply is the answer.
        assert_eq!(content, raw);
        assert_eq!(thought, "考え中");
    }

    #[test]
    fn test_parse_answer_without_thought() {
        let (content, thought) = parse_deep_thought("[最終回答]これが答え");
        assert_eq!(content, "これが答え");
        assert_eq!(thought, "(extraction failed)");
    }

    #[test]
    fn test_parse_multiline_sections() {
        let raw = "[思考]一行目\n二行目[/思考][最終回答]答え\n続き";
        let (content, thought) = parse_deep_thought(raw);
        assert_eq!(content, "答え\n続き");
        assert_eq!(thought, "一行目\n二行目");
    }

    #[test]
    fn test_subtask_id_roundtrip() {
        let id = subtask_id("m1", 4);
        assert_eq!(id, "m1__subtask_4");
        assert_eq!(subtask_index(&id), Some(4));
    }

    #[test]
    fn test_subtask_index_rejects_plain_ids() {
        assert_eq!(subtask_index("m1"), None);
        assert_eq!(subtask_index("m1__subtask_x"), None);
    }
}
