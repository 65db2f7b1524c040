//! Parallel fan-out over a set of models with per-task retry budgets.
//!
//! Tasks in one round run concurrently; rounds are sequential, so a retried
//! task always sees a pool already narrowed by sibling failures from the
//! same round. Replies are reported in the input order of the specs, not in
//! completion order.

use std::collections::HashMap;

use futures::future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::keypool::KeyPool;
use crate::llm::{classify_status, ApiError, ChatMessage, LlmClient, ModelReply, ModelSpec};

/// Lower bound on per-task attempts, regardless of pool size.
pub const MIN_RETRY: usize = 3;

#[derive(Debug, Error)]
pub enum ExecError {
    /// No task produced a reply.
    #[error("全ての並列推論モデルが失敗しました: {0}")]
    AllFailed(String),

    /// The client disconnected while calls were in flight.
    #[error("リクエストはキャンセルされました")]
    Cancelled,
}

/// Message input for a fan-out: one shared conversation, or one
/// conversation per spec id.
pub enum FanoutMessages<'a> {
    Shared(&'a [ChatMessage]),
    PerTask(&'a HashMap<String, Vec<ChatMessage>>),
}

enum TaskState {
    Pending,
    Done(ModelReply),
    Failed,
}

struct TaskSlot {
    spec: ModelSpec,
    messages: Vec<ChatMessage>,
    attempts: usize,
    max_attempts: usize,
    state: TaskState,
}

/// Fan-out executor borrowing the request's pool, client and cancel token.
pub struct ParallelExecutor<'a> {
    pool: &'a KeyPool,
    client: &'a dyn LlmClient,
    cancel: &'a CancellationToken,
}

impl<'a> ParallelExecutor<'a> {
    pub fn new(pool: &'a KeyPool, client: &'a dyn LlmClient, cancel: &'a CancellationToken) -> Self {
        Self {
            pool,
            client,
            cancel,
        }
    }

    /// Run one buffered call per spec, retrying per task until its budget or
    /// the pool is exhausted. Returns the successful replies in spec order;
    /// fails only when every task failed.
    pub async fn run(
        &self,
        specs: &[ModelSpec],
        messages: FanoutMessages<'_>,
    ) -> Result<Vec<ModelReply>, ExecError> {
        let initial_budget = self.pool.count().max(MIN_RETRY);
        let mut tasks: Vec<TaskSlot> = specs
            .iter()
            .map(|spec| {
                let msgs = match &messages {
                    FanoutMessages::Shared(shared) => shared.to_vec(),
                    FanoutMessages::PerTask(map) => {
                        map.get(&spec.id).cloned().unwrap_or_default()
                    }
                };
                // A task without messages cannot be attempted.
                let state = if msgs.is_empty() {
                    TaskState::Failed
                } else {
                    TaskState::Pending
                };
                TaskSlot {
                    spec: spec.clone(),
                    messages: msgs,
                    attempts: 0,
                    max_attempts: initial_budget,
                    state,
                }
            })
            .collect();

        let mut last_error: Option<ApiError> = None;

        loop {
            let pending: Vec<usize> = tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| matches!(t.state, TaskState::Pending))
                .map(|(i, _)| i)
                .collect();
            if pending.is_empty() || self.pool.count() == 0 {
                break;
            }

            // Hand a key to each pending task from the rotating cursor. With
            // a single remaining key, several tasks of the round intentionally
            // share it: retrying on the sole key beats failing for lack of a
            // distinct one.
            let mut round: Vec<(usize, String, ModelSpec, Vec<ChatMessage>)> = Vec::new();
            for idx in pending {
                match self.pool.next_key() {
                    Ok(key) => {
                        let task = &tasks[idx];
                        round.push((idx, key, task.spec.clone(), task.messages.clone()));
                    }
                    Err(_) => break,
                }
            }
            if round.is_empty() {
                break;
            }

            let calls = round.into_iter().map(|(idx, key, spec, msgs)| async move {
                let outcome = self.client.call_buffered(&key, &spec, &msgs).await;
                (idx, outcome)
            });
            let outcomes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExecError::Cancelled),
                outcomes = future::join_all(calls) => outcomes,
            };

            for (idx, outcome) in outcomes {
                tasks[idx].attempts += 1;
                match outcome {
                    Ok(content) => {
                        let task = &mut tasks[idx];
                        let mut reply = ModelReply::new(task.spec.model_name.clone(), content);
                        reply.id = Some(task.spec.id.clone());
                        task.state = TaskState::Done(reply);
                    }
                    Err(err) => {
                        let disposition = classify_status(err.status);
                        tracing::warn!(
                            model = %err.model,
                            status = err.status,
                            attempts = tasks[idx].attempts,
                            "parallel task attempt failed"
                        );

                        if disposition.evict_key {
                            self.pool.evict(&err.key);
                            let remaining = self.pool.count();
                            // Budgets only ever grow: each surviving task may
                            // still try every key left after the eviction.
                            for task in tasks
                                .iter_mut()
                                .filter(|t| matches!(t.state, TaskState::Pending))
                            {
                                task.max_attempts =
                                    task.max_attempts.max(task.attempts + remaining);
                            }
                        }

                        let task = &mut tasks[idx];
                        if disposition.permanent && disposition.drop_model {
                            task.state = TaskState::Failed;
                        } else if task.attempts >= task.max_attempts {
                            task.state = TaskState::Failed;
                        }
                        last_error = Some(err);
                    }
                }
            }
        }

        let replies: Vec<ModelReply> = tasks
            .into_iter()
            .filter_map(|t| match t.state {
                TaskState::Done(reply) => Some(reply),
                _ => None,
            })
            .collect();

        if replies.is_empty() {
            Err(ExecError::AllFailed(
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "実行可能なタスクがありません".to_string()),
            ))
        } else {
            Ok(replies)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::testing::{spec, ScriptedClient};

    fn pool(keys: &[&str]) -> KeyPool {
        KeyPool::from_ordered(keys.iter().map(|k| k.to_string()).collect()).unwrap()
    }

    fn shared_messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("こんにちは")]
    }

    #[tokio::test]
    async fn test_replies_in_spec_order() {
        let client = Arc::new(
            ScriptedClient::new()
                .on("A", Ok("答えA"))
                .on("B", Ok("答えB"))
                .on("C", Ok("答えC")),
        );
        let pool = pool(&["k1"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A"), spec("m2", "B"), spec("m3", "C")];
        let messages = shared_messages();
        let replies = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap();
        let models: Vec<&str> = replies.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["A", "B", "C"]);
        // Each reply carries its originating spec id.
        let ids: Vec<Option<&str>> = replies.iter().map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("m1"), Some("m2"), Some("m3")]);
    }

    #[tokio::test]
    async fn test_bad_key_evicted_then_success() {
        let client = Arc::new(
            ScriptedClient::new()
                .on_key("A", "KEY_BAD", Err(401))
                .on_key("A", "KEY_OK", Ok("ok")),
        );
        let pool = pool(&["KEY_BAD", "KEY_OK"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A")];
        let messages = shared_messages();
        let replies = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap();
        assert_eq!(replies[0].content, "ok");
        assert_eq!(pool.count(), 1);
    }

    #[tokio::test]
    async fn test_missing_model_dropped_without_eviction() {
        let client = Arc::new(ScriptedClient::new().on("A", Err(404)).on("B", Ok("yes")));
        let pool = pool(&["KEY_OK"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A"), spec("m2", "B")];
        let messages = shared_messages();
        let replies = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].model, "B");
        // The 404 neither evicted the key nor earned the model a retry.
        assert_eq!(pool.count(), 1);
        assert_eq!(client.call_count("A"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_use_full_budget() {
        let client = Arc::new(ScriptedClient::new().on("A", Err(500)));
        let pool = pool(&["k1"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A")];
        let messages = shared_messages();
        let err = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::AllFailed(_)));
        // Budget is max(pool size, MIN_RETRY) = 3.
        assert_eq!(client.call_count("A"), 3);
    }

    #[tokio::test]
    async fn test_budget_tracks_pool_size() {
        let client = Arc::new(ScriptedClient::new().on("A", Err(503)));
        let pool = pool(&["k1", "k2", "k3", "k4", "k5"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A")];
        let messages = shared_messages();
        let _ = exec.run(&specs, FanoutMessages::Shared(&messages)).await;
        assert_eq!(client.call_count("A"), 5);
    }

    #[tokio::test]
    async fn test_empty_per_task_messages_skipped() {
        let client = Arc::new(ScriptedClient::new().on("A", Ok("a")).on("B", Ok("b")));
        let pool = pool(&["k1"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A"), spec("m2", "B")];
        let mut overrides = HashMap::new();
        overrides.insert("m2".to_string(), shared_messages());
        let replies = exec
            .run(&specs, FanoutMessages::PerTask(&overrides))
            .await
            .unwrap();
        // m1 has no messages and is pre-marked failed; only B ran.
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].model, "B");
        assert_eq!(client.call_count("A"), 0);
    }

    #[tokio::test]
    async fn test_all_keys_bad_fails_with_empty_pool() {
        let client = Arc::new(ScriptedClient::new().on("A", Err(403)));
        let pool = pool(&["k1", "k2"]);
        let cancel = CancellationToken::new();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A")];
        let messages = shared_messages();
        let err = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::AllFailed(_)));
        assert_eq!(pool.count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_round() {
        let client = Arc::new(ScriptedClient::new().on("A", Ok("a")));
        let pool = pool(&["k1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = ParallelExecutor::new(&pool, client.as_ref(), &cancel);
        let specs = vec![spec("m1", "A")];
        let messages = shared_messages();
        let err = exec
            .run(&specs, FanoutMessages::Shared(&messages))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }
}
