//! Provider-agnostic contract for text-completion backends.
//!
//! This crate intentionally defines only the canonical request/response
//! shapes, the streaming callback contract, and the normalized error
//! taxonomy. It excludes backend transport details, wire payloads, and
//! orchestration concerns.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared cancellation flag for one completion call.
///
/// Deadline enforcement arms the flag from a watchdog thread; transports
/// poll it between await points.
pub type CancelSignal = Arc<AtomicBool>;

/// Backend family a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Local,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Local => "local",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags advertised per model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
    pub multimodal: bool,
}

/// Immutable metadata describing one routable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Globally unique identifier across all providers.
    pub id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub capabilities: ModelCapabilities,
    pub cost_per_1k_usd: f64,
    pub max_context_tokens: u32,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat message in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tool made available to the model for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-like input shape.
    pub input_schema: Value,
}

/// Structured tool-use request embedded in a completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque, provider-assigned, unique within one response.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub fn from_counts(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Why the completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    Error,
    Cancelled,
}

impl StopReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolUse => "tool_use",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Canonical completion request. Immutable once dispatched to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// System instruction kept separate from message roles; some backends
    /// require it as a top-level field.
    pub system: Option<String>,
    pub max_tokens: u32,
    /// Semantics are backend-defined.
    pub temperature: f64,
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Returns a copy retargeted at another model id, used by fallback
    /// routing.
    #[must_use]
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// Canonical completion response. Terminal; never mutated after delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    /// Content may be empty when the turn produced only tool calls.
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// Normalized provider failure. Vendor error shapes never cross this
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Backend unreachable or HTTP-level failure.
    Transport(String),
    /// Backend reachable but the response was malformed.
    Protocol(String),
    /// Deadline expiry or explicit cancellation.
    Cancelled,
}

impl ProviderError {
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Streaming callback contract.
///
/// Providers call `on_token` zero or more times strictly before exactly
/// one of `on_done` or `on_error`, and never call `on_token` afterwards.
pub trait StreamObserver: Send + Sync {
    fn on_token(&self, text: &str);
    fn on_done(&self, response: &CompletionResponse);
    fn on_error(&self, error: &ProviderError);
}

/// Uniform capability contract implemented once per backend.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Lists the models this provider can serve.
    ///
    /// Discovery failures yield an empty list; they must never abort
    /// startup.
    fn list_models(&self) -> Vec<ModelDescriptor>;

    /// Lightweight reachability probe used by the fallback chain.
    fn is_available(&self) -> bool;

    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Streams a completion through `observer`.
    ///
    /// The returned response (or error) is consistent with the last
    /// callback invoked.
    fn stream_complete(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn token_usage_from_counts_sums_total() {
        let usage = TokenUsage::from_counts(12, 30);
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn with_model_retargets_without_touching_other_fields() {
        let request = CompletionRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![Message::user("hi")],
            system: Some("be terse".to_string()),
            max_tokens: 256,
            temperature: 0.2,
            tools: Vec::new(),
            stream: true,
        };

        let retargeted = request.with_model("gpt-4o-mini");
        assert_eq!(retargeted.model, "gpt-4o-mini");
        assert_eq!(retargeted.messages, request.messages);
        assert_eq!(retargeted.system, request.system);
        assert_eq!(retargeted.max_tokens, 256);
    }

    #[test]
    fn provider_error_distinguishes_cancellation() {
        assert!(ProviderError::Cancelled.is_cancellation());
        assert!(!ProviderError::Transport("down".to_string()).is_cancellation());
        assert!(!ProviderError::Protocol("bad frame".to_string()).is_cancellation());
    }

    #[test]
    fn provider_error_display_is_stable() {
        assert_eq!(
            ProviderError::Transport("connection refused".to_string()).to_string(),
            "transport error: connection refused"
        );
        assert_eq!(
            ProviderError::Cancelled.to_string(),
            "request was cancelled"
        );
    }

    #[test]
    fn stop_reason_round_trips_as_str() {
        for (reason, expected) in [
            (StopReason::Stop, "stop"),
            (StopReason::ToolUse, "tool_use"),
            (StopReason::Error, "error"),
            (StopReason::Cancelled, "cancelled"),
        ] {
            assert_eq!(reason.as_str(), expected);
        }
    }

    #[test]
    fn tool_call_arguments_are_provider_neutral_json() {
        let mut arguments = Map::new();
        arguments.insert("path".to_string(), json!("notes/todo.md"));
        arguments.insert("content".to_string(), json!("hello"));

        let call = ToolCall {
            id: "call-42".to_string(),
            name: "write_file".to_string(),
            arguments,
        };

        assert_eq!(call.arguments["path"], "notes/todo.md");
        let round_trip: ToolCall =
            serde_json::from_str(&serde_json::to_string(&call).expect("serialize"))
                .expect("deserialize");
        assert_eq!(round_trip, call);
    }

    #[test]
    fn message_constructors_assign_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }
}
