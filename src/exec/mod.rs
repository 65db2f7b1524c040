//! Model-call executors.
//!
//! Two disciplines over the same retry/eviction policy: `parallel` fans out
//! one call per model with cross-task key coordination, `integration` wraps
//! the single downstream call that produces plans, summaries and the final
//! streamed answer.

mod integration;
mod parallel;

pub use integration::{IntegrationError, IntegrationExecutor};
pub use parallel::{ExecError, FanoutMessages, ParallelExecutor, MIN_RETRY};
