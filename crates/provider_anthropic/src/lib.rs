//! Anthropic-backed implementation of the shared `model_provider` contract.
//!
//! This adapter translates `anthropic_api` stream semantics into the
//! canonical completion shapes and `StreamObserver` callbacks consumed by
//! the orchestration layer.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anthropic_api::{
    AnthropicApiClient, AnthropicApiConfig, AnthropicApiError, AnthropicStreamEvent,
    ContentBlock, ContentBlockInfo, MessagesRequest, MessagesResponse, WireMessage, WireTool,
};
use model_provider::{
    CancelSignal, CompletionRequest, CompletionResponse, Message, ModelCapabilities,
    ModelDescriptor, Provider, ProviderError, ProviderKind, Role, StopReason, StreamObserver,
    TokenUsage, ToolCall,
};
use serde_json::Value;

/// Stable provider identifier used in status lines and routing logs.
pub const ANTHROPIC_PROVIDER_ID: &str = "anthropic";

/// Runtime configuration for the Anthropic provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl AnthropicProviderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_api_config(self) -> AnthropicApiConfig {
        let mut config = AnthropicApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

trait MessagesTransport: Send + Sync {
    fn stream(
        &self,
        request: &MessagesRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(AnthropicStreamEvent),
    ) -> Result<(), AnthropicApiError>;

    fn complete(
        &self,
        request: &MessagesRequest,
        cancel: &CancelSignal,
    ) -> Result<MessagesResponse, AnthropicApiError>;

    fn probe(&self) -> bool;
}

#[derive(Debug)]
struct DefaultTransport {
    client: AnthropicApiClient,
}

fn blocking_runtime() -> Result<tokio::runtime::Runtime, AnthropicApiError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            AnthropicApiError::Unknown(format!("failed to initialize tokio runtime: {error}"))
        })
}

impl MessagesTransport for DefaultTransport {
    fn stream(
        &self,
        request: &MessagesRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(AnthropicStreamEvent),
    ) -> Result<(), AnthropicApiError> {
        let runtime = blocking_runtime()?;
        runtime.block_on(self.client.stream_with_handler(request, Some(cancel), |event| {
            on_event(event);
        }))
    }

    fn complete(
        &self,
        request: &MessagesRequest,
        cancel: &CancelSignal,
    ) -> Result<MessagesResponse, AnthropicApiError> {
        let runtime = blocking_runtime()?;
        runtime.block_on(self.client.messages(request, Some(cancel)))
    }

    fn probe(&self) -> bool {
        match blocking_runtime() {
            Ok(runtime) => runtime.block_on(self.client.probe()),
            Err(_) => false,
        }
    }
}

/// `Provider` adapter backed by `anthropic_api` transport primitives.
pub struct AnthropicProvider {
    transport: Arc<dyn MessagesTransport>,
    has_key: bool,
}

impl AnthropicProvider {
    /// Creates a provider using real Messages API transport.
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let has_key = !config.api_key.trim().is_empty();
        let client = AnthropicApiClient::new(config.into_api_config())
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            transport: Arc::new(DefaultTransport { client }),
            has_key,
        })
    }

    #[cfg(test)]
    fn with_transport_for_tests(transport: Arc<dyn MessagesTransport>) -> Self {
        Self {
            transport,
            has_key: true,
        }
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        ANTHROPIC_PROVIDER_ID
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        anthropic_model_catalog()
    }

    fn is_available(&self) -> bool {
        self.has_key && self.transport.probe()
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError> {
        if cancel.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }

        let wire = build_wire_request(request)?;
        let response = self
            .transport
            .complete(&wire, cancel)
            .map_err(map_api_error)?;

        Ok(convert_response(response, request))
    }

    fn stream_complete(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError> {
        if cancel.load(Ordering::Acquire) {
            let error = ProviderError::Cancelled;
            observer.on_error(&error);
            return Err(error);
        }

        let mut wire = build_wire_request(request).map_err(|error| {
            observer.on_error(&error);
            error
        })?;
        wire.stream = true;

        let mut assembler = StreamAssembler::default();
        let result = self.transport.stream(&wire, cancel, &mut |event| {
            assembler.apply(event, observer);
        });

        match result {
            Ok(()) => {
                let response = assembler.finish(request);
                observer.on_done(&response);
                Ok(response)
            }
            Err(error) => {
                let error = map_api_error(error);
                observer.on_error(&error);
                Err(error)
            }
        }
    }
}

/// Accumulates stream events into one canonical response.
#[derive(Default)]
struct StreamAssembler {
    id: String,
    model: String,
    text: String,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
    tool_drafts: BTreeMap<usize, ToolUseDraft>,
}

struct ToolUseDraft {
    id: String,
    name: String,
    input_json: String,
}

impl StreamAssembler {
    fn apply(&mut self, event: AnthropicStreamEvent, observer: &dyn StreamObserver) {
        match event {
            AnthropicStreamEvent::MessageStart {
                id,
                model,
                input_tokens,
            } => {
                self.id = id;
                self.model = model;
                self.input_tokens = input_tokens;
            }
            AnthropicStreamEvent::ContentBlockStart { index, block } => {
                if let ContentBlockInfo::ToolUse { id, name } = block {
                    self.tool_drafts.insert(
                        index,
                        ToolUseDraft {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    );
                }
            }
            AnthropicStreamEvent::TextDelta { text, .. } => {
                if !text.is_empty() {
                    observer.on_token(&text);
                    self.text.push_str(&text);
                }
            }
            AnthropicStreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(draft) = self.tool_drafts.get_mut(&index) {
                    draft.input_json.push_str(&partial_json);
                }
            }
            AnthropicStreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if output_tokens > 0 {
                    self.output_tokens = output_tokens;
                }
            }
            AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::MessageStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Error { .. } => {}
        }
    }

    fn finish(self, request: &CompletionRequest) -> CompletionResponse {
        // BTreeMap iteration preserves content-block order.
        let tool_calls: Vec<ToolCall> = self
            .tool_drafts
            .into_values()
            .map(|draft| ToolCall {
                id: draft.id,
                name: draft.name,
                arguments: parse_tool_arguments(&draft.input_json),
            })
            .collect();

        let model = if self.model.is_empty() {
            request.model.clone()
        } else {
            self.model
        };

        CompletionResponse {
            id: self.id,
            model,
            message: Message {
                role: Role::Assistant,
                content: self.text,
            },
            stop_reason: map_stop_reason(self.stop_reason.as_deref(), !tool_calls.is_empty()),
            tool_calls,
            usage: TokenUsage::from_counts(self.input_tokens, self.output_tokens),
        }
    }
}

fn build_wire_request(request: &CompletionRequest) -> Result<MessagesRequest, ProviderError> {
    let mut system_parts: Vec<String> = Vec::new();
    if let Some(system) = request.system.as_deref() {
        if !system.trim().is_empty() {
            system_parts.push(system.to_string());
        }
    }

    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            // The Messages API takes the system instruction as a top-level
            // field, never as a message role.
            Role::System => system_parts.push(message.content.clone()),
            Role::User => messages.push(WireMessage::user(message.content.clone())),
            Role::Assistant => messages.push(WireMessage::assistant(message.content.clone())),
        }
    }

    if messages.is_empty() {
        return Err(ProviderError::Protocol(
            "request must contain at least one user or assistant message".to_string(),
        ));
    }

    let mut wire = MessagesRequest::new(request.model.clone(), request.max_tokens, messages);
    if !system_parts.is_empty() {
        wire.system = Some(system_parts.join("\n\n"));
    }
    wire.temperature = Some(request.temperature);
    wire.tools = request
        .tools
        .iter()
        .map(|tool| WireTool {
            name: tool.name.clone(),
            description: if tool.description.is_empty() {
                None
            } else {
                Some(tool.description.clone())
            },
            input_schema: tool.input_schema.clone(),
        })
        .collect();

    Ok(wire)
}

fn convert_response(response: MessagesResponse, request: &CompletionRequest) -> CompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: chunk } => text.push_str(&chunk),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: match input {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                },
            }),
            ContentBlock::Unknown => {}
        }
    }

    let model = if response.model.is_empty() {
        request.model.clone()
    } else {
        response.model
    };

    CompletionResponse {
        id: response.id,
        model,
        message: Message {
            role: Role::Assistant,
            content: text,
        },
        stop_reason: map_stop_reason(response.stop_reason.as_deref(), !tool_calls.is_empty()),
        tool_calls,
        usage: TokenUsage::from_counts(response.usage.input_tokens, response.usage.output_tokens),
    }
}

fn map_stop_reason(wire: Option<&str>, has_tool_calls: bool) -> StopReason {
    match wire {
        Some("tool_use") => StopReason::ToolUse,
        Some(_) => StopReason::Stop,
        None if has_tool_calls => StopReason::ToolUse,
        None => StopReason::Stop,
    }
}

fn parse_tool_arguments(input_json: &str) -> serde_json::Map<String, Value> {
    if input_json.trim().is_empty() {
        return serde_json::Map::new();
    }

    // A draft that never finished arriving parses as empty arguments
    // rather than failing the whole completion.
    match serde_json::from_str::<Value>(input_json) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

fn map_api_error(error: AnthropicApiError) -> ProviderError {
    if error.is_cancellation() {
        return ProviderError::Cancelled;
    }

    match error {
        AnthropicApiError::Serde(_) | AnthropicApiError::StreamFailed { .. } => {
            ProviderError::Protocol(error.to_string())
        }
        other => ProviderError::Transport(other.to_string()),
    }
}

fn anthropic_model_catalog() -> Vec<ModelDescriptor> {
    let full = ModelCapabilities {
        streaming: true,
        tools: true,
        vision: true,
        multimodal: true,
    };

    vec![
        ModelDescriptor {
            id: "claude-opus-4-20250514".to_string(),
            display_name: "Claude Opus 4".to_string(),
            provider: ProviderKind::Anthropic,
            capabilities: full,
            cost_per_1k_usd: 0.015,
            max_context_tokens: 200_000,
        },
        ModelDescriptor {
            id: "claude-sonnet-4-20250514".to_string(),
            display_name: "Claude Sonnet 4".to_string(),
            provider: ProviderKind::Anthropic,
            capabilities: full,
            cost_per_1k_usd: 0.003,
            max_context_tokens: 200_000,
        },
        ModelDescriptor {
            id: "claude-3-5-haiku-20241022".to_string(),
            display_name: "Claude Haiku 3.5".to_string(),
            provider: ProviderKind::Anthropic,
            capabilities: full,
            cost_per_1k_usd: 0.00025,
            max_context_tokens: 200_000,
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    use model_provider::ToolDefinition;
    use serde_json::json;

    use super::*;

    enum FakeOutcome {
        Events(Vec<AnthropicStreamEvent>),
        Error(AnthropicApiError),
    }

    struct FakeTransport {
        observed_request: Mutex<Option<MessagesRequest>>,
        outcome: Mutex<Option<FakeOutcome>>,
    }

    impl FakeTransport {
        fn events(events: Vec<AnthropicStreamEvent>) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(FakeOutcome::Events(events))),
            })
        }

        fn failure(error: AnthropicApiError) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(FakeOutcome::Error(error))),
            })
        }

        fn observed_request(&self) -> Option<MessagesRequest> {
            self.observed_request
                .lock()
                .expect("observed request lock")
                .clone()
        }
    }

    impl MessagesTransport for FakeTransport {
        fn stream(
            &self,
            request: &MessagesRequest,
            _cancel: &CancelSignal,
            on_event: &mut dyn FnMut(AnthropicStreamEvent),
        ) -> Result<(), AnthropicApiError> {
            *self.observed_request.lock().expect("lock") = Some(request.clone());

            match self.outcome.lock().expect("lock").take() {
                Some(FakeOutcome::Events(events)) => {
                    for event in events {
                        on_event(event);
                    }
                    Ok(())
                }
                Some(FakeOutcome::Error(error)) => Err(error),
                None => panic!("fake outcome should be consumed exactly once"),
            }
        }

        fn complete(
            &self,
            request: &MessagesRequest,
            _cancel: &CancelSignal,
        ) -> Result<MessagesResponse, AnthropicApiError> {
            *self.observed_request.lock().expect("lock") = Some(request.clone());
            Err(AnthropicApiError::Unknown("not scripted".to_string()))
        }

        fn probe(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        tokens: Mutex<Vec<String>>,
        done: Mutex<Vec<CompletionResponse>>,
        errors: Mutex<Vec<ProviderError>>,
    }

    impl StreamObserver for RecordingObserver {
        fn on_token(&self, text: &str) {
            self.tokens.lock().expect("lock").push(text.to_string());
        }

        fn on_done(&self, response: &CompletionResponse) {
            self.done.lock().expect("lock").push(response.clone());
        }

        fn on_error(&self, error: &ProviderError) {
            self.errors.lock().expect("lock").push(error.clone());
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages: vec![Message::user("hello")],
            system: None,
            max_tokens: 512,
            temperature: 0.7,
            tools: Vec::new(),
            stream: true,
        }
    }

    fn cancel() -> CancelSignal {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn stream_assembles_text_and_reports_tokens_in_order() {
        let transport = FakeTransport::events(vec![
            AnthropicStreamEvent::MessageStart {
                id: "msg_1".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                input_tokens: 10,
            },
            AnthropicStreamEvent::TextDelta {
                index: 0,
                text: "Hello".to_string(),
            },
            AnthropicStreamEvent::TextDelta {
                index: 0,
                text: ", world!".to_string(),
            },
            AnthropicStreamEvent::MessageDelta {
                stop_reason: Some("end_turn".to_string()),
                output_tokens: 5,
            },
            AnthropicStreamEvent::MessageStop,
        ]);
        let provider =
            AnthropicProvider::with_transport_for_tests(Arc::clone(&transport) as Arc<dyn MessagesTransport>);
        let observer = RecordingObserver::default();

        let response = provider
            .stream_complete(&request(), &observer, &cancel())
            .expect("stream should succeed");

        assert_eq!(response.message.content, "Hello, world!");
        assert_eq!(response.stop_reason, StopReason::Stop);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 5);
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(
            *observer.tokens.lock().expect("lock"),
            vec!["Hello".to_string(), ", world!".to_string()]
        );
        assert_eq!(observer.done.lock().expect("lock").len(), 1);
        assert!(observer.errors.lock().expect("lock").is_empty());
    }

    #[test]
    fn stream_assembles_tool_calls_from_partial_json() {
        let transport = FakeTransport::events(vec![
            AnthropicStreamEvent::ContentBlockStart {
                index: 1,
                block: ContentBlockInfo::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "write_file".to_string(),
                },
            },
            AnthropicStreamEvent::InputJsonDelta {
                index: 1,
                partial_json: "{\"path\":\"a.txt\",".to_string(),
            },
            AnthropicStreamEvent::InputJsonDelta {
                index: 1,
                partial_json: "\"content\":\"hi\"}".to_string(),
            },
            AnthropicStreamEvent::ContentBlockStop { index: 1 },
            AnthropicStreamEvent::MessageDelta {
                stop_reason: Some("tool_use".to_string()),
                output_tokens: 8,
            },
        ]);
        let provider = AnthropicProvider::with_transport_for_tests(transport);
        let observer = RecordingObserver::default();

        let response = provider
            .stream_complete(&request(), &observer, &cancel())
            .expect("stream should succeed");

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.name, "write_file");
        assert_eq!(call.arguments["path"], "a.txt");
        assert_eq!(call.arguments["content"], "hi");
    }

    #[test]
    fn system_role_messages_lift_into_top_level_field() {
        let transport = FakeTransport::events(vec![AnthropicStreamEvent::MessageStop]);
        let provider =
            AnthropicProvider::with_transport_for_tests(Arc::clone(&transport) as Arc<dyn MessagesTransport>);
        let observer = RecordingObserver::default();

        let mut req = request();
        req.system = Some("Be terse.".to_string());
        req.messages = vec![
            Message::system("Never use emoji."),
            Message::user("hello"),
        ];
        req.tools = vec![ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file".to_string(),
            input_schema: json!({"type": "object"}),
        }];

        provider
            .stream_complete(&req, &observer, &cancel())
            .expect("stream should succeed");

        let wire = transport.observed_request().expect("request observed");
        assert_eq!(wire.system.as_deref(), Some("Be terse.\n\nNever use emoji."));
        assert_eq!(wire.messages, vec![WireMessage::user("hello")]);
        assert!(wire.stream);
        assert_eq!(wire.tools.len(), 1);
        assert_eq!(wire.tools[0].name, "write_file");
    }

    #[test]
    fn empty_conversation_is_rejected_before_transport() {
        let transport = FakeTransport::events(Vec::new());
        let provider =
            AnthropicProvider::with_transport_for_tests(Arc::clone(&transport) as Arc<dyn MessagesTransport>);
        let observer = RecordingObserver::default();

        let mut req = request();
        req.messages = vec![Message::system("only instructions")];

        let error = provider
            .stream_complete(&req, &observer, &cancel())
            .expect_err("empty conversation must fail");

        assert!(matches!(error, ProviderError::Protocol(_)));
        assert!(transport.observed_request().is_none());
        assert_eq!(observer.errors.lock().expect("lock").len(), 1);
    }

    #[test]
    fn cancelled_transport_maps_to_cancelled_error() {
        let transport = FakeTransport::failure(AnthropicApiError::Cancelled);
        let provider = AnthropicProvider::with_transport_for_tests(transport);
        let observer = RecordingObserver::default();

        let error = provider
            .stream_complete(&request(), &observer, &cancel())
            .expect_err("cancelled stream must fail");

        assert_eq!(error, ProviderError::Cancelled);
        assert_eq!(
            *observer.errors.lock().expect("lock"),
            vec![ProviderError::Cancelled]
        );
        assert!(observer.done.lock().expect("lock").is_empty());
    }

    #[test]
    fn in_band_stream_failure_maps_to_protocol_error() {
        let transport = FakeTransport::failure(AnthropicApiError::StreamFailed {
            kind: Some("overloaded_error".to_string()),
            message: "Overloaded".to_string(),
        });
        let provider = AnthropicProvider::with_transport_for_tests(transport);
        let observer = RecordingObserver::default();

        let error = provider
            .stream_complete(&request(), &observer, &cancel())
            .expect_err("stream failure must surface");

        assert!(matches!(error, ProviderError::Protocol(_)));
    }

    #[test]
    fn transport_failure_maps_to_transport_error() {
        let transport = FakeTransport::failure(AnthropicApiError::Unknown("boom".to_string()));
        let provider = AnthropicProvider::with_transport_for_tests(transport);
        let observer = RecordingObserver::default();

        let error = provider
            .stream_complete(&request(), &observer, &cancel())
            .expect_err("transport failure must surface");

        assert!(matches!(error, ProviderError::Transport(message) if message.contains("boom")));
    }

    #[test]
    fn catalog_lists_anthropic_models() {
        let transport = FakeTransport::events(Vec::new());
        let provider = AnthropicProvider::with_transport_for_tests(transport);

        let models = provider.list_models();
        assert!(!models.is_empty());
        assert!(models
            .iter()
            .all(|model| model.provider == ProviderKind::Anthropic));
        assert!(models
            .iter()
            .any(|model| model.id == "claude-sonnet-4-20250514"));
    }
}
