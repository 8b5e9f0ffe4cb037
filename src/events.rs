//! Stream lifecycle events and the bounded channel that carries them to
//! the renderer.
//!
//! Only the per-stream flush thread emits onto this channel, which keeps
//! event order total without extra coordination. The provider-facing
//! callbacks never touch the channel directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::{SystemTime, UNIX_EPOCH};

use model_provider::ToolCall;
use serde_json::Value;

/// Bounded capacity of the UI event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 512;

static STREAM_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for one completion stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(String);

impl StreamId {
    /// Allocates the next process-unique stream id.
    #[must_use]
    pub fn next() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        let sequence = STREAM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("stream-{nanos}-{sequence}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse stream state carried by status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Running,
    Complete,
    Error,
}

impl StatusLabel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// Tool execution checkpoint within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallPhase {
    Start,
    End,
}

/// One message on the UI event channel.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum StreamEvent {
    /// A completion cycle began.
    StreamStart {
        stream_id: StreamId,
        prompt: String,
        model: String,
        provider: String,
        at: SystemTime,
    },
    /// Batched assistant text; concatenation across a stream equals the
    /// full response content.
    TokenDelta { stream_id: StreamId, text: String },
    /// Terminal success event. Exactly one terminal event per stream.
    StreamEnd {
        stream_id: StreamId,
        tokens_used: u32,
        cost_usd: f64,
    },
    /// Terminal failure event. Exactly one terminal event per stream.
    StreamError { stream_id: StreamId, error: String },
    /// Tool execution progress, reported after the terminal event.
    ToolCall {
        stream_id: StreamId,
        tool_call_id: String,
        name: String,
        arguments: Value,
        phase: ToolCallPhase,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Periodic status line refresh.
    StatusUpdate {
        stream_id: StreamId,
        model: String,
        provider: String,
        tokens_used: u32,
        cost_usd: f64,
        status: StatusLabel,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::StreamStart { stream_id, .. }
            | Self::TokenDelta { stream_id, .. }
            | Self::StreamEnd { stream_id, .. }
            | Self::StreamError { stream_id, .. }
            | Self::ToolCall { stream_id, .. }
            | Self::StatusUpdate { stream_id, .. } => stream_id,
        }
    }

    /// Builds the start-phase event for one tool call.
    #[must_use]
    pub fn tool_call_start(stream_id: StreamId, call: &ToolCall) -> Self {
        Self::ToolCall {
            stream_id,
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()),
            phase: ToolCallPhase::Start,
            result: None,
            error: None,
        }
    }
}

/// Creates the bounded UI event channel.
#[must_use]
pub fn event_channel() -> (EventSender, Receiver<StreamEvent>) {
    let (tx, rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
    (EventSender { tx }, rx)
}

/// Cloneable sending half of the UI event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: SyncSender<StreamEvent>,
}

impl EventSender {
    /// Blocking send. Returns false when the receiver is gone.
    pub fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TokenDelta {
            stream_id: StreamId("stream-test-0".to_string()),
            text: text.to_string(),
        }
    }

    #[test]
    fn stream_ids_are_unique() {
        let a = StreamId::next();
        let b = StreamId::next();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("stream-"));
    }

    #[test]
    fn send_reports_disconnected_receiver() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(!tx.send(delta("a")));
    }

    #[test]
    fn events_expose_their_stream_id() {
        let id = StreamId::next();
        let event = StreamEvent::StreamError {
            stream_id: id.clone(),
            error: "boom".to_string(),
        };
        assert_eq!(event.stream_id(), &id);
    }
}
