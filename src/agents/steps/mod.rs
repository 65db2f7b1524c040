//! The step library.
//!
//! Every step is an atomic operation over the shared [`AgentContext`]: it
//! either fully populates the output slots it is contracted to produce, or
//! it fails and the orchestrator aborts the pipeline. Steps never unset
//! inputs.

mod execute;
mod integrate;
mod plan;

use thiserror::Error;

use crate::agents::context::AgentContext;
use crate::agents::summarize;
use crate::exec::{ExecError, IntegrationError};
use crate::llm::ModelReply;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("有効なモデルが設定されていません")]
    NoEnabledModels,

    #[error("統合対象の応答がありません")]
    NoResponses,

    #[error("サブタスクが計画されていません")]
    NoSubtasks,
}

impl StepError {
    /// Whether the step failed because the client went away.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StepError::Exec(ExecError::Cancelled)
                | StepError::Integration(IntegrationError::Cancelled)
        )
    }
}

/// One pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Summarize,
    PlanSubtasks,
    GenerateHypotheses,
    ExecuteStandard,
    ExecuteExpertTeam,
    ExecuteDeepThought,
    ExecuteGenerators,
    ExecuteCritics,
    ExecuteRouter,
    ExecuteSubtasks,
    ExecuteEmotionAnalysis,
    IntegrateStandard,
    IntegrateDeepThought,
    IntegrateWithCritiques,
    IntegrateReport,
    IntegrateWithEmotion,
    ReflectionLoop,
}

impl Step {
    /// Name reported in `STATUS:STEP` frames.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Summarize => "SUMMARIZE",
            Step::PlanSubtasks => "PLAN_SUBTASKS",
            Step::GenerateHypotheses => "GENERATE_HYPOTHESES",
            Step::ExecuteStandard => "EXECUTE_STANDARD",
            Step::ExecuteExpertTeam => "EXECUTE_EXPERT_TEAM",
            Step::ExecuteDeepThought => "EXECUTE_DEEP_THOUGHT",
            Step::ExecuteGenerators => "EXECUTE_GENERATORS",
            Step::ExecuteCritics => "EXECUTE_CRITICS",
            Step::ExecuteRouter => "EXECUTE_ROUTER",
            Step::ExecuteSubtasks => "EXECUTE_SUBTASKS",
            Step::ExecuteEmotionAnalysis => "EXECUTE_EMOTION_ANALYSIS",
            Step::IntegrateStandard => "INTEGRATE_STANDARD",
            Step::IntegrateDeepThought => "INTEGRATE_DEEP_THOUGHT",
            Step::IntegrateWithCritiques => "INTEGRATE_WITH_CRITIQUES",
            Step::IntegrateReport => "INTEGRATE_REPORT",
            Step::IntegrateWithEmotion => "INTEGRATE_WITH_EMOTION",
            Step::ReflectionLoop => "REFLECTION_LOOP",
        }
    }

    /// Run the step against the context.
    pub async fn run(&self, ctx: &mut AgentContext) -> Result<(), StepError> {
        match self {
            Step::Summarize => {
                // Normally executed by the orchestrator as the pre-step;
                // harmless to run again since the thresholds no longer hold.
                summarize::run(ctx).await;
                Ok(())
            }
            Step::PlanSubtasks => plan::subtasks(ctx).await,
            Step::GenerateHypotheses => plan::hypotheses(ctx).await,
            Step::ExecuteStandard => execute::standard(ctx).await,
            Step::ExecuteExpertTeam => execute::expert_team(ctx).await,
            Step::ExecuteDeepThought => execute::deep_thought(ctx).await,
            Step::ExecuteGenerators => execute::generators(ctx).await,
            Step::ExecuteCritics => execute::critics(ctx).await,
            Step::ExecuteRouter => plan::router(ctx).await,
            Step::ExecuteSubtasks => execute::subtasks(ctx).await,
            Step::ExecuteEmotionAnalysis => execute::emotion_analysis(ctx).await,
            Step::IntegrateStandard => integrate::standard(ctx).await,
            Step::IntegrateDeepThought => integrate::deep_thought(ctx).await,
            Step::IntegrateWithCritiques => integrate::with_critiques(ctx).await,
            Step::IntegrateReport => integrate::report(ctx).await,
            Step::IntegrateWithEmotion => integrate::with_emotion(ctx).await,
            Step::ReflectionLoop => {
                // Composite: deep-thought drafts, critique pass, final edit.
                ctx.sink.status(Step::ExecuteDeepThought.name());
                execute::deep_thought(ctx).await?;
                ctx.sink.status(Step::ExecuteCritics.name());
                execute::critics(ctx).await?;
                ctx.sink.status(Step::IntegrateWithCritiques.name());
                integrate::with_critiques(ctx).await
            }
        }
    }
}

/// Numbered listing of replies, as fed to integrator prompts.
pub(crate) fn numbered_replies(replies: &[ModelReply]) -> String {
    replies
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}:\n{}", i + 1, r.model, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse a JSON string array out of a model reply, tolerating Markdown code
/// fences around the payload. Empty arrays count as a parse failure.
pub(crate) fn parse_string_array(raw: &str) -> Option<Vec<String>> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str::<Vec<String>>(cleaned)
        .ok()
        .filter(|v| !v.is_empty())
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest).trim_start();
        if let Some(body) = text.strip_suffix("```") {
            text = body.trim_end();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        assert_eq!(
            parse_string_array(r#"["調査", "比較"]"#),
            Some(vec!["調査".to_string(), "比較".to_string()])
        );
    }

    #[test]
    fn test_parse_fenced_array() {
        let raw = "```json\n[\"a\", \"b\"]\n```";
        assert_eq!(
            parse_string_array(raw),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        let bare_fence = "```\n[\"c\"]\n```";
        assert_eq!(parse_string_array(bare_fence), Some(vec!["c".to_string()]));
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse_string_array("ただのテキスト"), None);
        assert_eq!(parse_string_array("[]"), None);
        assert_eq!(parse_string_array(r#"{"not": "array"}"#), None);
    }

    #[test]
    fn test_numbered_replies_layout() {
        let replies = vec![
            ModelReply::new("A", "一つ目"),
            ModelReply::new("B", "二つ目"),
        ];
        let listing = numbered_replies(&replies);
        assert_eq!(listing, "1. A:\n一つ目\n\n2. B:\n二つ目");
    }

    #[test]
    fn test_step_names_are_upper_snake() {
        assert_eq!(Step::ExecuteStandard.name(), "EXECUTE_STANDARD");
        assert_eq!(Step::IntegrateWithCritiques.name(), "INTEGRATE_WITH_CRITIQUES");
    }
}
