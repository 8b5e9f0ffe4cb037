//! Chat Completions-backed implementation of the shared `model_provider`
//! contract.
//!
//! One adapter serves both hosted OpenAI and any OpenAI-compatible local
//! endpoint (llama.cpp server, Ollama, vLLM). Hosted mode advertises a
//! static catalog; local mode discovers models from the endpoint and
//! degrades to an empty catalog when the endpoint is down.

mod wire;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use model_provider::{
    CancelSignal, CompletionRequest, CompletionResponse, Message, ModelCapabilities,
    ModelDescriptor, Provider, ProviderError, ProviderKind, Role, StopReason, StreamObserver,
    TokenUsage, ToolCall,
};
use serde_json::Value;

pub use wire::{
    ChatMessage, ChatRequest, ChatResponse, ChatStreamEvent, ChatTool, ChunkStreamParser,
    ModelsResponse,
};

pub const OPENAI_PROVIDER_ID: &str = "openai";
pub const LOCAL_PROVIDER_ID: &str = "local";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime configuration for an OpenAI-compatible provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub kind: ProviderKind,
    pub timeout: Option<Duration>,
}

impl OpenAiProviderConfig {
    /// Hosted OpenAI configuration.
    #[must_use]
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            kind: ProviderKind::OpenAi,
            timeout: None,
        }
    }

    /// Local OpenAI-compatible endpoint, typically keyless.
    #[must_use]
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            api_key: String::new(),
            base_url: base_url.into(),
            kind: ProviderKind::Local,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

trait ChatTransport: Send + Sync {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<(), ProviderError>;

    fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
    ) -> Result<ChatResponse, ProviderError>;

    /// Discovery failures yield an empty list, never an error.
    fn discover_model_ids(&self) -> Vec<String>;

    fn probe(&self) -> bool;
}

struct HttpChatTransport {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpChatTransport {
    fn new(config: &OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn models_endpoint(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn post(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.chat_endpoint()).json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        builder
    }

    async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = await_or_cancel(self.post(request).send(), cancel)
            .await?
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = await_or_cancel(response.text(), cancel)
                .await?
                .unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }

        Ok(response)
    }
}

fn blocking_runtime() -> Result<tokio::runtime::Runtime, ProviderError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            ProviderError::Transport(format!("failed to initialize tokio runtime: {error}"))
        })
}

impl ChatTransport for HttpChatTransport {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<(), ProviderError> {
        let runtime = blocking_runtime()?;
        runtime.block_on(async {
            let response = self.send(request, cancel).await?;
            let mut bytes = response.bytes_stream();
            let mut parser = ChunkStreamParser::default();

            loop {
                let Some(chunk) = await_or_cancel(bytes.next(), cancel).await? else {
                    break;
                };
                let chunk =
                    chunk.map_err(|error| ProviderError::Transport(error.to_string()))?;
                for event in parser.feed(&chunk) {
                    if matches!(event, ChatStreamEvent::Done) {
                        return Ok(());
                    }
                    on_event(event);
                }
            }

            Ok(())
        })
    }

    fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
    ) -> Result<ChatResponse, ProviderError> {
        let runtime = blocking_runtime()?;
        runtime.block_on(async {
            let response = self.send(request, cancel).await?;
            let body = await_or_cancel(response.text(), cancel)
                .await?
                .map_err(|error| ProviderError::Transport(error.to_string()))?;
            serde_json::from_str(&body)
                .map_err(|error| ProviderError::Protocol(error.to_string()))
        })
    }

    fn discover_model_ids(&self) -> Vec<String> {
        let Ok(runtime) = blocking_runtime() else {
            return Vec::new();
        };

        runtime.block_on(async {
            let mut builder = self
                .http
                .get(self.models_endpoint())
                .timeout(PROBE_TIMEOUT);
            if !self.api_key.is_empty() {
                builder = builder.bearer_auth(&self.api_key);
            }

            let Ok(response) = builder.send().await else {
                return Vec::new();
            };
            if !response.status().is_success() {
                return Vec::new();
            }
            match response.json::<ModelsResponse>().await {
                Ok(models) => models.data.into_iter().map(|entry| entry.id).collect(),
                Err(_) => Vec::new(),
            }
        })
    }

    fn probe(&self) -> bool {
        let Ok(runtime) = blocking_runtime() else {
            return false;
        };

        runtime.block_on(async {
            let mut builder = self
                .http
                .get(self.models_endpoint())
                .timeout(PROBE_TIMEOUT);
            if !self.api_key.is_empty() {
                builder = builder.bearer_auth(&self.api_key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    status.is_success() || status == reqwest::StatusCode::UNAUTHORIZED
                }
                Err(_) => false,
            }
        })
    }
}

async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, ProviderError>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if cancel.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if cancel.load(Ordering::Acquire) {
                return Err(ProviderError::Cancelled);
            }
            return Ok(output);
        }
    }
}

/// `Provider` adapter for OpenAI-compatible chat endpoints.
pub struct OpenAiProvider {
    kind: ProviderKind,
    has_key: bool,
    transport: Arc<dyn ChatTransport>,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let kind = config.kind;
        let has_key = !config.api_key.trim().is_empty();
        let transport = Arc::new(HttpChatTransport::new(&config)?);

        Ok(Self {
            kind,
            has_key,
            transport,
        })
    }

    #[cfg(test)]
    fn with_transport_for_tests(kind: ProviderKind, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            kind,
            has_key: true,
            transport,
        }
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::Local => LOCAL_PROVIDER_ID,
            _ => OPENAI_PROVIDER_ID,
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        match self.kind {
            ProviderKind::Local => self
                .transport
                .discover_model_ids()
                .into_iter()
                .map(local_model_descriptor)
                .collect(),
            _ => openai_model_catalog(),
        }
    }

    fn is_available(&self) -> bool {
        match self.kind {
            ProviderKind::Local => self.transport.probe(),
            _ => self.has_key && self.transport.probe(),
        }
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError> {
        if cancel.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }

        let wire = build_chat_request(request)?;
        let response = self.transport.complete(&wire, cancel)?;
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

        let mut wire = build_chat_request(request).map_err(|error| {
            observer.on_error(&error);
            error
        })?;
        wire.stream = true;

        let mut assembler = ChatAssembler::default();
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
                observer.on_error(&error);
                Err(error)
            }
        }
    }
}

#[derive(Default)]
struct ChatAssembler {
    text: String,
    finish_reason: Option<String>,
    prompt_tokens: u32,
    completion_tokens: u32,
    tool_drafts: BTreeMap<usize, ToolCallDraft>,
}

#[derive(Default)]
struct ToolCallDraft {
    id: String,
    name: String,
    arguments: String,
}

impl ChatAssembler {
    fn apply(&mut self, event: ChatStreamEvent, observer: &dyn StreamObserver) {
        match event {
            ChatStreamEvent::ContentDelta { text } => {
                observer.on_token(&text);
                self.text.push_str(&text);
            }
            ChatStreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let draft = self.tool_drafts.entry(index).or_default();
                if let Some(id) = id {
                    draft.id = id;
                }
                if let Some(name) = name {
                    draft.name = name;
                }
                if let Some(arguments) = arguments {
                    draft.arguments.push_str(&arguments);
                }
            }
            ChatStreamEvent::Finish { reason } => self.finish_reason = Some(reason),
            ChatStreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                self.prompt_tokens = prompt_tokens;
                self.completion_tokens = completion_tokens;
            }
            ChatStreamEvent::Done => {}
        }
    }

    fn finish(self, request: &CompletionRequest) -> CompletionResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_drafts
            .into_values()
            .map(|draft| ToolCall {
                id: draft.id,
                name: draft.name,
                arguments: parse_arguments(&draft.arguments),
            })
            .collect();

        CompletionResponse {
            id: String::new(),
            model: request.model.clone(),
            message: Message {
                role: Role::Assistant,
                content: self.text,
            },
            stop_reason: map_finish_reason(self.finish_reason.as_deref(), !tool_calls.is_empty()),
            tool_calls,
            usage: TokenUsage::from_counts(self.prompt_tokens, self.completion_tokens),
        }
    }
}

fn build_chat_request(request: &CompletionRequest) -> Result<ChatRequest, ProviderError> {
    let mut messages = Vec::new();

    if let Some(system) = request.system.as_deref() {
        if !system.trim().is_empty() {
            messages.push(ChatMessage::new("system", system));
        }
    }

    for message in &request.messages {
        messages.push(ChatMessage::new(message.role.as_str(), message.content.clone()));
    }

    if messages.is_empty() {
        return Err(ProviderError::Protocol(
            "request must contain at least one message".to_string(),
        ));
    }

    let mut wire = ChatRequest::new(request.model.clone(), request.max_tokens, messages);
    wire.temperature = Some(request.temperature);
    wire.tools = request
        .tools
        .iter()
        .map(|tool| {
            ChatTool::function(
                tool.name.clone(),
                tool.description.clone(),
                tool.input_schema.clone(),
            )
        })
        .collect();

    Ok(wire)
}

fn convert_response(response: ChatResponse, request: &CompletionRequest) -> CompletionResponse {
    let usage = response.usage.unwrap_or_default();
    let model = if response.model.is_empty() {
        request.model.clone()
    } else {
        response.model
    };

    let Some(choice) = response.choices.into_iter().next() else {
        return CompletionResponse {
            id: response.id,
            model,
            message: Message {
                role: Role::Assistant,
                content: String::new(),
            },
            tool_calls: Vec::new(),
            stop_reason: StopReason::Stop,
            usage: TokenUsage::from_counts(usage.prompt_tokens, usage.completion_tokens),
        };
    };

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_arguments(&call.function.arguments),
        })
        .collect();

    CompletionResponse {
        id: response.id,
        model,
        message: Message {
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
        },
        stop_reason: map_finish_reason(choice.finish_reason.as_deref(), !tool_calls.is_empty()),
        tool_calls,
        usage: TokenUsage::from_counts(usage.prompt_tokens, usage.completion_tokens),
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    match reason {
        Some("tool_calls") => StopReason::ToolUse,
        Some(_) => StopReason::Stop,
        None if has_tool_calls => StopReason::ToolUse,
        None => StopReason::Stop,
    }
}

fn parse_arguments(arguments: &str) -> serde_json::Map<String, Value> {
    if arguments.trim().is_empty() {
        return serde_json::Map::new();
    }

    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

fn openai_model_catalog() -> Vec<ModelDescriptor> {
    let full = ModelCapabilities {
        streaming: true,
        tools: true,
        vision: true,
        multimodal: true,
    };

    vec![
        ModelDescriptor {
            id: "gpt-4o".to_string(),
            display_name: "GPT-4o".to_string(),
            provider: ProviderKind::OpenAi,
            capabilities: full,
            cost_per_1k_usd: 0.005,
            max_context_tokens: 128_000,
        },
        ModelDescriptor {
            id: "gpt-4o-mini".to_string(),
            display_name: "GPT-4o mini".to_string(),
            provider: ProviderKind::OpenAi,
            capabilities: full,
            cost_per_1k_usd: 0.00015,
            max_context_tokens: 128_000,
        },
    ]
}

fn local_model_descriptor(id: String) -> ModelDescriptor {
    ModelDescriptor {
        display_name: id.clone(),
        id,
        provider: ProviderKind::Local,
        capabilities: ModelCapabilities {
            streaming: true,
            tools: false,
            vision: false,
            multimodal: false,
        },
        cost_per_1k_usd: 0.0,
        max_context_tokens: 8_192,
    }
}
