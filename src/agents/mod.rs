//! Thinking-mode pipelines over a shared execution context.
//!
//! A mode (agent) is an ordered list of steps; each step reads and extends
//! the per-request [`AgentContext`]. The registry is a closed enumeration:
//! unknown mode ids fall back to the standard pipeline.

pub mod context;
pub mod registry;
pub mod steps;
pub mod summarize;

pub use context::AgentContext;
pub use registry::AgentMode;
pub use steps::{Step, StepError};
