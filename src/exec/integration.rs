//! Single-call integration executor.
//!
//! One logical downstream call with the same retry and eviction discipline
//! as a lone parallel task. The buffered flavour backs the summariser,
//! planner, router, persona/hypothesis generators and meta-analyser; the
//! streaming flavour backs every integrate step and writes `DATA` frames
//! straight to the client while accumulating the final text.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::exec::MIN_RETRY;
use crate::keypool::KeyPool;
use crate::llm::{classify_status, ApiError, ChatMessage, LlmClient, ModelParams};
use crate::stream::StreamSink;

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Retry budget exhausted or the pool emptied.
    #[error("統合モデルの呼び出しに失敗しました: {0}")]
    Failed(String),

    /// The client disconnected while the call was in flight.
    #[error("リクエストはキャンセルされました")]
    Cancelled,
}

/// Executor for the single integrator-style call.
pub struct IntegrationExecutor<'a> {
    pool: &'a KeyPool,
    client: &'a dyn LlmClient,
    cancel: &'a CancellationToken,
}

impl<'a> IntegrationExecutor<'a> {
    pub fn new(pool: &'a KeyPool, client: &'a dyn LlmClient, cancel: &'a CancellationToken) -> Self {
        Self {
            pool,
            client,
            cancel,
        }
    }

    /// Run the call buffered, returning the whole reply.
    pub async fn run_buffered(
        &self,
        params: &ModelParams,
        messages: &[ChatMessage],
    ) -> Result<String, IntegrationError> {
        self.run_inner(params, messages, None).await
    }

    /// Run the call streaming `DATA` frames to `sink`, returning the
    /// accumulated reply.
    pub async fn run_streaming(
        &self,
        params: &ModelParams,
        messages: &[ChatMessage],
        sink: &StreamSink,
    ) -> Result<String, IntegrationError> {
        self.run_inner(params, messages, Some(sink)).await
    }

    async fn run_inner(
        &self,
        params: &ModelParams,
        messages: &[ChatMessage],
        sink: Option<&StreamSink>,
    ) -> Result<String, IntegrationError> {
        if messages.is_empty() {
            return Err(IntegrationError::Failed(
                "メッセージが空です".to_string(),
            ));
        }

        let spec = params.to_spec("integrator");
        let mut attempts = 0usize;
        let mut max_attempts = self.pool.count().max(MIN_RETRY);
        let mut last_error: Option<ApiError> = None;

        while attempts < max_attempts && self.pool.count() > 0 {
            let Ok(key) = self.pool.next_key() else {
                break;
            };

            let call = async {
                match sink {
                    Some(sink) => {
                        self.client
                            .call_streaming(&key, &spec, messages, sink)
                            .await
                    }
                    None => self.client.call_buffered(&key, &spec, messages).await,
                }
            };
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IntegrationError::Cancelled),
                outcome = call => outcome,
            };
            attempts += 1;

            match outcome {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let disposition = classify_status(err.status);
                    tracing::warn!(
                        model = %err.model,
                        status = err.status,
                        attempts,
                        "integration attempt failed"
                    );
                    if disposition.evict_key {
                        self.pool.evict(&err.key);
                        max_attempts = max_attempts.max(attempts + self.pool.count());
                    }
                    if disposition.permanent && disposition.drop_model {
                        // The integrator model itself is bad; more keys
                        // won't change that.
                        return Err(IntegrationError::Failed(err.to_string()));
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(IntegrationError::Failed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "利用可能な API キーがありません".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::stream::Frame;

    fn params(model: &str) -> ModelParams {
        ModelParams {
            model_name: model.to_string(),
            temperature: 0.5,
            max_output_tokens: 512,
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("統合してください")]
    }

    #[tokio::test]
    async fn test_buffered_success() {
        let client = Arc::new(ScriptedClient::new().on("INT", Ok("統合結果")));
        let pool = KeyPool::new(vec!["k1".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let text = exec.run_buffered(&params("INT"), &messages()).await.unwrap();
        assert_eq!(text, "統合結果");
    }

    #[tokio::test]
    async fn test_streaming_forwards_data_frames() {
        let client = Arc::new(ScriptedClient::new().on("INT", Ok("hello")));
        let pool = KeyPool::new(vec!["k1".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let (sink, mut rx) = StreamSink::channel();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let text = exec
            .run_streaming(&params("INT"), &messages(), &sink)
            .await
            .unwrap();
        assert_eq!(text, "hello");
        drop(sink);
        let mut streamed = String::new();
        while let Some(line) = rx.recv().await {
            if let Some(Frame::Data(chunk)) = Frame::decode(line.trim_end_matches('\n')) {
                streamed.push_str(&chunk);
            }
        }
        assert_eq!(streamed, "hello");
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let client = Arc::new(ScriptedClient::new().on("INT", Err(500)));
        let pool = KeyPool::new(vec!["k1".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let err = exec
            .run_buffered(&params("INT"), &messages())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Failed(_)));
        assert_eq!(client.call_count("INT"), MIN_RETRY);
    }

    #[tokio::test]
    async fn test_bad_model_fails_fast() {
        let client = Arc::new(ScriptedClient::new().on("INT", Err(404)));
        let pool = KeyPool::new(vec!["k1".to_string(), "k2".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let err = exec
            .run_buffered(&params("INT"), &messages())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Failed(_)));
        assert_eq!(client.call_count("INT"), 1);
        assert_eq!(pool.count(), 2);
    }

    #[tokio::test]
    async fn test_key_rotation_on_auth_failure() {
        let client = Arc::new(
            ScriptedClient::new()
                .on_key("INT", "KEY_BAD", Err(401))
                .on_key("INT", "KEY_OK", Ok("done")),
        );
        let pool =
            KeyPool::from_ordered(vec!["KEY_BAD".to_string(), "KEY_OK".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let text = exec.run_buffered(&params("INT"), &messages()).await.unwrap();
        assert_eq!(text, "done");
        assert_eq!(pool.count(), 1);
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let client = Arc::new(ScriptedClient::new());
        let pool = KeyPool::new(vec!["k1".to_string()]).unwrap();
        let cancel = CancellationToken::new();
        let exec = IntegrationExecutor::new(&pool, client.as_ref(), &cancel);
        let err = exec.run_buffered(&params("INT"), &[]).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Failed(_)));
        assert_eq!(client.call_count("INT"), 0);
    }
}
