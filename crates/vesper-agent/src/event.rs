//! Typed event stream from the loop to the client.
//!
//! The loop writes [`AgentEvent`]s into a bounded channel; the front-end
//! adapter reads them and applies its own framing (JSON lines, SSE, ...).
//! The channel back-pressures only when the client stalls, which the loop
//! tolerates, and closes when the loop drops its sender after `Done`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Content events are chunked to this many characters.
pub const CONTENT_CHUNK_CHARS: usize = 1000;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of a `tool_call` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallNotice {
    /// Human-readable note, e.g. "2 tools".
    pub message: String,
}

/// Payload of a `tool_result` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    /// Name of the tool that produced the result.
    pub tool: String,
    /// The result body as shown to the client.
    pub result: String,
}

/// A typed record on the outbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Diagnostics: compaction state, loaded TODOs, LTM writes.
    Meta {
        /// Arbitrary diagnostic payload.
        data: Value,
    },
    /// A chunk of assistant text.
    Content {
        /// The text chunk.
        data: String,
    },
    /// Tools are about to be dispatched.
    ToolCall {
        /// The notice payload.
        data: ToolCallNotice,
    },
    /// One tool finished.
    ToolResult {
        /// The result payload.
        data: ToolResultPayload,
    },
    /// Terminal event; nothing follows.
    Done,
}

impl AgentEvent {
    /// A meta event.
    pub fn meta(data: Value) -> Self {
        Self::Meta { data }
    }

    /// A content chunk.
    pub fn content(data: impl Into<String>) -> Self {
        Self::Content { data: data.into() }
    }

    /// A tool-call notice for `count` calls.
    pub fn tool_call(count: usize) -> Self {
        Self::ToolCall {
            data: ToolCallNotice {
                message: format!("{count} tools"),
            },
        }
    }

    /// A tool result.
    pub fn tool_result(tool: impl Into<String>, result: impl Into<String>) -> Self {
        Self::ToolResult {
            data: ToolResultPayload {
                tool: tool.into(),
                result: result.into(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Sending half of the event stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSender {
    /// Emit one event. Returns `false` when the receiver is gone (client
    /// disconnected), which the loop treats as cancellation.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Emit assistant text in fixed-size character chunks.
    pub async fn emit_content_chunks(&self, content: &str) -> bool {
        let chars: Vec<char> = content.chars().collect();
        for chunk in chars.chunks(CONTENT_CHUNK_CHARS) {
            let piece: String = chunk.iter().collect();
            if !self.emit(AgentEvent::content(piece)).await {
                return false;
            }
        }
        true
    }
}

/// Create the bounded event channel.
pub fn event_channel() -> (EventSender, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender { tx }, rx)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = AgentEvent::content("hi");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["data"], "hi");

        let ev = AgentEvent::tool_call(3);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["data"]["message"], "3 tools");

        let json = serde_json::to_value(AgentEvent::Done).unwrap();
        assert_eq!(json["type"], "done");
    }

    #[test]
    fn meta_event_carries_arbitrary_data() {
        let ev = AgentEvent::meta(json!({"compact": {"compacted": false}}));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["data"]["compact"]["compacted"], false);
    }

    #[tokio::test]
    async fn content_is_chunked_by_characters() {
        let (tx, mut rx) = event_channel();
        let text = "a".repeat(2500);
        assert!(tx.emit_content_chunks(&text).await);
        drop(tx);

        let mut chunks = Vec::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                AgentEvent::Content { data } => chunks.push(data),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[tokio::test]
    async fn emit_reports_closed_receiver() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(!tx.emit(AgentEvent::Done).await);
    }
}
