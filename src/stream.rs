//! Line-oriented response stream protocol.
//!
//! The engine answers every chat request with a `text/plain` stream of
//! newline-terminated frames, prefix-tagged so the client can dispatch on
//! the first colon-delimited token:
//!
//! - `STATUS:STEP:<name>` - progress indicator, informational
//! - `DATA:<chunk>` - fragment of the final answer, concatenated in order
//! - `MODEL_RESPONSES:<json>` - per-model replies for UI display, exactly
//!   one per successful request
//! - `SUMMARY_EXECUTED:<json>` - emitted iff the summariser ran
//! - `ERROR:<message>` - fatal; no further frames follow
//!
//! `DATA` and `ERROR` bodies are escaped (`\` and newline) so a frame is
//! always exactly one line and concatenated `DATA` bodies decode back to
//! the final answer byte-for-byte. The JSON payloads need no escaping since
//! serde_json never emits raw newlines.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatMessage, ModelReply};

/// One frame of the response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Progress indicator carrying the step name.
    Status(String),
    /// A fragment of the final assistant answer.
    Data(String),
    /// Per-model replies for the UI.
    ModelResponses(Vec<ModelReply>),
    /// Synthetic history prefix produced by the summariser.
    SummaryExecuted(Vec<ChatMessage>),
    /// Fatal error; terminates the stream.
    Error(String),
}

impl Frame {
    /// Encode the frame as a single newline-terminated line.
    pub fn encode(&self) -> String {
        match self {
            Frame::Status(step) => format!("STATUS:STEP:{}\n", step),
            Frame::Data(chunk) => format!("DATA:{}\n", escape(chunk)),
            Frame::ModelResponses(replies) => {
                let json = serde_json::to_string(replies).unwrap_or_else(|_| "[]".to_string());
                format!("MODEL_RESPONSES:{}\n", json)
            }
            Frame::SummaryExecuted(messages) => {
                let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
                format!("SUMMARY_EXECUTED:{}\n", json)
            }
            Frame::Error(message) => format!("ERROR:{}\n", escape(message)),
        }
    }

    /// Decode one line (without its trailing newline). Lines that match no
    /// tag yield `None` and are to be ignored by clients.
    pub fn decode(line: &str) -> Option<Frame> {
        if let Some(step) = line.strip_prefix("STATUS:STEP:") {
            Some(Frame::Status(step.to_string()))
        } else if let Some(chunk) = line.strip_prefix("DATA:") {
            Some(Frame::Data(unescape(chunk)))
        } else if let Some(json) = line.strip_prefix("MODEL_RESPONSES:") {
            serde_json::from_str(json).ok().map(Frame::ModelResponses)
        } else if let Some(json) = line.strip_prefix("SUMMARY_EXECUTED:") {
            serde_json::from_str(json).ok().map(Frame::SummaryExecuted)
        } else {
            line.strip_prefix("ERROR:")
                .map(|message| Frame::Error(unescape(message)))
        }
    }
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Write side of the per-request response stream.
///
/// The sink owns the request's cancellation token: once the client goes
/// away (the receiving side of the channel is dropped), the first failed
/// send cancels the token, which aborts in-flight upstream calls.
#[derive(Clone)]
pub struct StreamSink {
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl StreamSink {
    /// Create a sink plus the receiver feeding the response body.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Token cancelled when the client disconnects.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Emit a frame. Best-effort: a send to a disconnected client cancels
    /// the request token instead of erroring.
    pub fn send(&self, frame: Frame) {
        if self.tx.send(frame.encode()).is_err() {
            self.cancel.cancel();
        }
    }

    /// Emit a `STATUS:STEP` frame.
    pub fn status(&self, step: &str) {
        self.send(Frame::Status(step.to_string()));
    }

    /// Emit a `DATA` frame.
    pub fn data(&self, chunk: &str) {
        self.send(Frame::Data(chunk.to_string()));
    }
}
