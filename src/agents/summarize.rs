//! Conditional history compression pre-step.
//!
//! Long conversations are compressed into a single synthetic system message
//! before the pipeline runs, keeping the context window for the actual
//! thinking. Summarisation is best-effort: a failure is logged and the
//! pipeline continues with the uncompressed history.

use crate::agents::context::AgentContext;
use crate::llm::ChatMessage;
use crate::stream::Frame;

/// History length above which the summariser kicks in.
pub const MESSAGE_THRESHOLD: usize = 10;

/// Total content length above which the summariser kicks in.
pub const CHAR_THRESHOLD: usize = 30_000;

/// Prefix of the synthetic system message carrying the summary.
pub const SUMMARY_PREFIX: &str = "[以前の会話の要約]";

const SUMMARIZE_INSTRUCTION: &str = "これまでの会話全体を、第三者の視点から詳細に要約してください。\
システムプロンプトの意図が保たれるように、重要な文脈・決定事項・固有名詞をすべて含めてください。\
要約の本文のみを出力してください。";

/// Whether the thresholds call for compression.
pub fn should_summarize(message_count: usize, total_content_length: usize) -> bool {
    message_count > MESSAGE_THRESHOLD || total_content_length > CHAR_THRESHOLD
}

/// Run the pre-step: compress everything before the last user turn into one
/// system message and emit a `SUMMARY_EXECUTED` frame.
pub async fn run(ctx: &mut AgentContext) {
    if !should_summarize(ctx.messages.len(), ctx.total_content_length) {
        return;
    }

    let last_user = match ctx.messages.last() {
        Some(message) => message.clone(),
        None => return,
    };

    let mut request: Vec<ChatMessage> = ctx.messages[..ctx.messages.len() - 1].to_vec();
    request.push(ChatMessage::user(SUMMARIZE_INSTRUCTION));

    let params = ctx.app_config.summarizer.clone();
    let outcome = ctx.integration().run_buffered(&params, &request).await;

    match outcome {
        Ok(summary) => {
            let summary_message = ChatMessage::system(format!("{}\n{}", SUMMARY_PREFIX, summary));
            ctx.messages = vec![summary_message.clone(), last_user];
            ctx.summary_executed = true;
            ctx.new_history_context = vec![summary_message.clone()];
            ctx.sink.send(Frame::SummaryExecuted(vec![summary_message]));
            tracing::info!("history compressed into summary message");
        }
        Err(err) => {
            tracing::warn!(error = %err, "summarisation failed, continuing with full history");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::agents::AgentMode;
    use crate::keypool::KeyPool;
    use crate::llm::testing::{spec, ScriptedClient};
    use crate::llm::{AppConfig, ModelParams, Role};
    use crate::stream::StreamSink;

    #[test]
    fn test_thresholds() {
        assert!(!should_summarize(10, 30_000));
        assert!(should_summarize(11, 0));
        assert!(should_summarize(0, 30_001));
        assert!(should_summarize(11, 30_001));
        assert!(!should_summarize(2, 40));
    }

    fn context_with(
        client: Arc<ScriptedClient>,
        history: Vec<ChatMessage>,
        total_content_length: usize,
    ) -> (AgentContext, UnboundedReceiver<String>) {
        let (sink, rx) = StreamSink::channel();
        let pool = Arc::new(KeyPool::new(vec!["k1".to_string()]).unwrap());
        let app_config = AppConfig {
            summarizer: ModelParams {
                model_name: "SUMM".to_string(),
                temperature: 0.3,
                max_output_tokens: 512,
            },
            integrator: ModelParams::integrator_default(),
        };
        let ctx = AgentContext::new(
            pool,
            client,
            sink,
            AgentMode::Standard,
            history,
            vec![spec("m1", "A")],
            app_config,
            None,
            total_content_length,
        );
        (ctx, rx)
    }

    fn long_history() -> Vec<ChatMessage> {
        let mut history = Vec::new();
        for i in 0..6 {
            history.push(ChatMessage::user(format!("質問{}", i)));
            history.push(ChatMessage::assistant(format!("回答{}", i)));
        }
        history.push(ChatMessage::user("最後の質問"));
        history
    }

    #[tokio::test]
    async fn test_success_compresses_history() {
        let client = Arc::new(ScriptedClient::new().on("SUMM", Ok("要約文")));
        let (mut ctx, mut rx) = context_with(client, long_history(), 0);
        run(&mut ctx).await;

        assert!(ctx.summary_executed);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].role, Role::System);
        assert_eq!(ctx.messages[0].content, "[以前の会話の要約]\n要約文");
        assert_eq!(ctx.messages[1].content, "最後の質問");
        assert_eq!(ctx.new_history_context, vec![ctx.messages[0].clone()]);

        let line = rx.try_recv().unwrap();
        assert!(line.starts_with("SUMMARY_EXECUTED:"));
    }

    #[tokio::test]
    async fn test_single_huge_message_still_summarised() {
        // The content-length trigger is independent of the message count: a
        // lone oversized message still runs the summariser, with an empty
        // prefix to compress.
        let client = Arc::new(ScriptedClient::new().on("SUMM", Ok("SUM")));
        let history = vec![ChatMessage::user("非常に長い質問")];
        let (mut ctx, _rx) = context_with(Arc::clone(&client), history.clone(), 40_000);
        run(&mut ctx).await;

        assert!(ctx.summary_executed);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].content, "[以前の会話の要約]\nSUM");
        assert_eq!(ctx.messages[1], history[0]);
        assert_eq!(client.call_count("SUMM"), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_history_untouched() {
        // No rule for SUMM: every attempt fails with 500.
        let client = Arc::new(ScriptedClient::new());
        let history = long_history();
        let (mut ctx, mut rx) = context_with(Arc::clone(&client), history.clone(), 0);
        run(&mut ctx).await;

        assert!(!ctx.summary_executed);
        assert_eq!(ctx.messages, history);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_below_thresholds_is_noop() {
        let client = Arc::new(ScriptedClient::new().on("SUMM", Ok("要約文")));
        let history = vec![ChatMessage::user("短い質問")];
        let (mut ctx, _rx) = context_with(Arc::clone(&client), history.clone(), 10);
        run(&mut ctx).await;

        assert!(!ctx.summary_executed);
        assert_eq!(ctx.messages, history);
        assert_eq!(client.call_count("SUMM"), 0);
    }
}
