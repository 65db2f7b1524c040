//! Agent registry - the closed set of thinking modes.
//!
//! Each mode maps to a fixed, ordered step pipeline. Every pipeline starts
//! with the summarise pre-step; the orchestrator runs summarisation itself
//! before iterating and skips it here, but the declarative entry documents
//! that every mode operates on the possibly-compressed history.

use crate::agents::steps::Step;

/// A thinking mode selectable per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Standard,
    ExpertTeam,
    DeepThought,
    Critique,
    DynamicRouter,
    Manager,
    ReflectionLoop,
    Hypothesis,
    EmotionAnalysis,
}

impl AgentMode {
    /// Resolve a wire mode id. Unknown ids fall back to `Standard`.
    pub fn from_id(id: &str) -> Self {
        match id {
            "standard" => AgentMode::Standard,
            "expert_team" => AgentMode::ExpertTeam,
            "deep_thought" => AgentMode::DeepThought,
            "critique" => AgentMode::Critique,
            "dynamic_router" => AgentMode::DynamicRouter,
            "manager" => AgentMode::Manager,
            "reflection_loop" => AgentMode::ReflectionLoop,
            "hypothesis" => AgentMode::Hypothesis,
            "emotion_analysis" => AgentMode::EmotionAnalysis,
            other => {
                tracing::warn!(mode = other, "unknown agent mode, falling back to standard");
                AgentMode::Standard
            }
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            AgentMode::Standard => "standard",
            AgentMode::ExpertTeam => "expert_team",
            AgentMode::DeepThought => "deep_thought",
            AgentMode::Critique => "critique",
            AgentMode::DynamicRouter => "dynamic_router",
            AgentMode::Manager => "manager",
            AgentMode::ReflectionLoop => "reflection_loop",
            AgentMode::Hypothesis => "hypothesis",
            AgentMode::EmotionAnalysis => "emotion_analysis",
        }
    }

    /// The ordered step pipeline for this mode.
    pub fn steps(&self) -> &'static [Step] {
        match self {
            AgentMode::Standard => &[
                Step::Summarize,
                Step::ExecuteStandard,
                Step::IntegrateStandard,
            ],
            AgentMode::ExpertTeam => &[
                Step::Summarize,
                Step::ExecuteExpertTeam,
                Step::IntegrateStandard,
            ],
            AgentMode::DeepThought => &[
                Step::Summarize,
                Step::ExecuteDeepThought,
                Step::IntegrateDeepThought,
            ],
            AgentMode::Critique => &[
                Step::Summarize,
                Step::ExecuteGenerators,
                Step::ExecuteCritics,
                Step::IntegrateWithCritiques,
            ],
            AgentMode::DynamicRouter => &[
                Step::Summarize,
                Step::ExecuteRouter,
                Step::ExecuteExpertTeam,
                Step::IntegrateStandard,
            ],
            AgentMode::Manager => &[
                Step::Summarize,
                Step::PlanSubtasks,
                Step::ExecuteSubtasks,
                Step::IntegrateReport,
            ],
            AgentMode::ReflectionLoop => &[Step::Summarize, Step::ReflectionLoop],
            AgentMode::Hypothesis => &[
                Step::Summarize,
                Step::GenerateHypotheses,
                Step::ExecuteSubtasks,
                Step::IntegrateReport,
            ],
            AgentMode::EmotionAnalysis => &[
                Step::Summarize,
                Step::ExecuteEmotionAnalysis,
                Step::IntegrateWithEmotion,
            ],
        }
    }
}
