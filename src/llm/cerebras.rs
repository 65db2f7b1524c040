//! Cerebras chat-completions client.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::{ChatMessage, LlmClient, ModelSpec};
use crate::stream::StreamSink;

const CEREBRAS_API_URL: &str = "https://api.cerebras.ai/v1/chat/completions";

/// Provider label attached to every model reply.
pub const PROVIDER: &str = "cerebras";

/// Cerebras API client.
pub struct CerebrasClient {
    client: Client,
}

impl CerebrasClient {
    /// Create a new Cerebras client.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn error(&self, status: u16, key: &str, spec: &ModelSpec, message: impl Into<String>) -> ApiError {
        ApiError {
            status,
            key: key.to_string(),
            model: spec.model_name.clone(),
            message: message.into(),
        }
    }

    async fn send(
        &self,
        key: &str,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let request = CerebrasRequest {
            model: &spec.model_name,
            messages,
            temperature: spec.temperature,
            max_completion_tokens: spec.max_output_tokens,
            stream,
        };

        tracing::debug!(model = %spec.model_name, stream, "sending request to Cerebras");

        let response = self
            .client
            .post(CEREBRAS_API_URL)
            .header("Authorization", format!("Bearer {}", key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.error(500, key, spec, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model = %spec.model_name, %status, "Cerebras error: {}", truncate(&body));
            return Err(self.error(status.as_u16(), key, spec, truncate(&body)));
        }

        Ok(response)
    }
}

impl Default for CerebrasClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for CerebrasClient {
    async fn call_buffered(
        &self,
        key: &str,
        spec: &ModelSpec,
        messages: &[ChatMessage],
    ) -> Result<String, ApiError> {
        let response = self.send(key, spec, messages, false).await?;
        let body = response
            .text()
            .await
            .map_err(|e| self.error(500, key, spec, e.to_string()))?;

        let completion: CerebrasResponse = serde_json::from_str(&body)
            .map_err(|e| self.error(500, key, spec, format!("unparseable response: {}", e)))?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn call_streaming(
        &self,
        key: &str,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        sink: &StreamSink,
    ) -> Result<String, ApiError> {
        let response = self.send(key, spec, messages, true).await?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut accumulated = String::new();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| self.error(500, key, spec, e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            // SSE lines can straddle chunk boundaries; only complete lines
            // are consumed, the remainder stays buffered.
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                match sse_token(&line) {
                    SseToken::Content(token) => {
                        sink.data(&token);
                        accumulated.push_str(&token);
                    }
                    SseToken::Done => break 'outer,
                    SseToken::Skip => {}
                }
            }
        }

        Ok(accumulated)
    }
}

enum SseToken {
    Content(String),
    Done,
    Skip,
}

/// Extract the content delta from one SSE line, if it carries one.
fn sse_token(line: &str) -> SseToken {
    let Some(payload) = line.trim().strip_prefix("data: ") else {
        return SseToken::Skip;
    };
    if payload == "[DONE]" {
        return SseToken::Done;
    }
    let Ok(chunk) = serde_json::from_str::<CerebrasChunk>(payload) else {
        return SseToken::Skip;
    };
    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(token) if !token.is_empty() => SseToken::Content(token),
        _ => SseToken::Skip,
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}…", &body[..cut])
    }
}

/// Cerebras API request format (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct CerebrasRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_completion_tokens: u64,
    stream: bool,
}

/// Cerebras API response format (buffered).
#[derive(Debug, Deserialize)]
struct CerebrasResponse {
    choices: Vec<CerebrasChoice>,
}

#[derive(Debug, Deserialize)]
struct CerebrasChoice {
    message: CerebrasMessage,
}

#[derive(Debug, Deserialize)]
struct CerebrasMessage {
    content: Option<String>,
}

/// One streamed completion chunk.
#[derive(Debug, Deserialize)]
struct CerebrasChunk {
    choices: Vec<CerebrasChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct CerebrasChunkChoice {
    delta: CerebrasDelta,
}

#[derive(Debug, Deserialize)]
struct CerebrasDelta {
    #[serde(default)]
    content: Option<String>,
}
