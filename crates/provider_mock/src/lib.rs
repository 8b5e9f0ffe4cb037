//! Deterministic mock implementation of the shared `model_provider` contract.
//!
//! This crate contains no transport logic and is intended for local
//! development runs and contract-level integration testing of the
//! streaming pipeline.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use model_provider::{
    CancelSignal, CompletionRequest, CompletionResponse, Message, ModelCapabilities,
    ModelDescriptor, Provider, ProviderError, ProviderKind, Role, StopReason, StreamObserver,
    TokenUsage, ToolCall,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const TOKEN_DELAY: Duration = Duration::from_millis(5);
const HANG_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum Behavior {
    /// Emit the scripted chunks, then finish.
    Script(Vec<String>),
    /// Never produce output; only a cancel signal ends the call.
    Hang,
    /// Fail immediately with a transport error.
    Fail(String),
}

/// Deterministic provider used by pipeline tests and offline runs.
#[derive(Debug)]
pub struct MockProvider {
    behavior: Behavior,
    tool_calls: Vec<ToolCall>,
    model_ids: Vec<String>,
    available: bool,
}

impl MockProvider {
    /// Streams the given chunks in order.
    #[must_use]
    pub fn scripted(chunks: Vec<String>) -> Self {
        Self {
            behavior: Behavior::Script(chunks),
            tool_calls: Vec::new(),
            model_ids: vec!["mock-model".to_string()],
            available: true,
        }
    }

    /// Blocks until cancelled, then reports a cancellation error.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            behavior: Behavior::Hang,
            tool_calls: Vec::new(),
            model_ids: vec!["mock-model".to_string()],
            available: true,
        }
    }

    /// Fails every completion with a transport error.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Fail(message.into()),
            tool_calls: Vec::new(),
            model_ids: vec!["mock-model".to_string()],
            available: true,
        }
    }

    /// Attaches tool calls to every successful completion.
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Overrides the advertised model ids.
    #[must_use]
    pub fn with_models(mut self, model_ids: Vec<String>) -> Self {
        self.model_ids = model_ids;
        self
    }

    /// Makes `is_available` report false.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn build_response(&self, request: &CompletionRequest, content: String) -> CompletionResponse {
        let output_tokens = (content.len() / 4) as u32;
        let stop_reason = if self.tool_calls.is_empty() {
            StopReason::Stop
        } else {
            StopReason::ToolUse
        };

        CompletionResponse {
            id: format!("mock-{}", request.model),
            model: request.model.clone(),
            message: Message {
                role: Role::Assistant,
                content,
            },
            tool_calls: self.tool_calls.clone(),
            stop_reason,
            usage: TokenUsage::from_counts(0, output_tokens),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::scripted(vec![
            "Hello".to_string(),
            ", ".to_string(),
            "world".to_string(),
            "!".to_string(),
        ])
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.model_ids
            .iter()
            .map(|id| ModelDescriptor {
                id: id.clone(),
                display_name: id.clone(),
                provider: ProviderKind::Mock,
                capabilities: ModelCapabilities {
                    streaming: true,
                    tools: true,
                    vision: false,
                    multimodal: false,
                },
                cost_per_1k_usd: 0.0,
                max_context_tokens: 32_768,
            })
            .collect()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError> {
        match &self.behavior {
            Behavior::Script(chunks) => {
                if cancel.load(Ordering::Acquire) {
                    return Err(ProviderError::Cancelled);
                }
                Ok(self.build_response(request, chunks.concat()))
            }
            Behavior::Hang => loop {
                if cancel.load(Ordering::Acquire) {
                    return Err(ProviderError::Cancelled);
                }
                thread::sleep(HANG_POLL_INTERVAL);
            },
            Behavior::Fail(message) => Err(ProviderError::Transport(message.clone())),
        }
    }

    fn stream_complete(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancelSignal,
    ) -> Result<CompletionResponse, ProviderError> {
        match &self.behavior {
            Behavior::Script(chunks) => {
                let mut content = String::new();

                for chunk in chunks {
                    if cancel.load(Ordering::Acquire) {
                        let error = ProviderError::Cancelled;
                        observer.on_error(&error);
                        return Err(error);
                    }

                    observer.on_token(chunk);
                    content.push_str(chunk);
                    thread::sleep(TOKEN_DELAY);
                }

                let response = self.build_response(request, content);
                observer.on_done(&response);
                Ok(response)
            }
            Behavior::Hang => loop {
                if cancel.load(Ordering::Acquire) {
                    let error = ProviderError::Cancelled;
                    observer.on_error(&error);
                    return Err(error);
                }
                thread::sleep(HANG_POLL_INTERVAL);
            },
            Behavior::Fail(message) => {
                let error = ProviderError::Transport(message.clone());
                observer.on_error(&error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

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
            model: "mock-model".to_string(),
            messages: vec![Message::user("hi")],
            system: None,
            max_tokens: 128,
            temperature: 0.0,
            tools: Vec::new(),
            stream: true,
        }
    }

    #[test]
    fn default_script_streams_hello_world() {
        let provider = MockProvider::default();
        let observer = RecordingObserver::default();
        let cancel = Arc::new(AtomicBool::new(false));

        let response = provider
            .stream_complete(&request(), &observer, &cancel)
            .expect("scripted stream should succeed");

        assert_eq!(response.message.content, "Hello, world!");
        assert_eq!(response.stop_reason, StopReason::Stop);
        assert_eq!(observer.tokens.lock().expect("lock").concat(), "Hello, world!");
        assert_eq!(observer.done.lock().expect("lock").len(), 1);
        assert!(observer.errors.lock().expect("lock").is_empty());
    }

    #[test]
    fn hanging_provider_observes_cancel_signal() {
        let provider = Arc::new(MockProvider::hanging());
        let observer = Arc::new(RecordingObserver::default());
        let cancel = Arc::new(AtomicBool::new(false));

        let handle = {
            let provider = Arc::clone(&provider);
            let observer = Arc::clone(&observer);
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || provider.stream_complete(&request(), &*observer, &cancel))
        };

        thread::sleep(Duration::from_millis(30));
        cancel.store(true, Ordering::Release);

        let result = handle.join().expect("stream thread should finish");
        assert_eq!(result, Err(ProviderError::Cancelled));
        assert_eq!(
            *observer.errors.lock().expect("lock"),
            vec![ProviderError::Cancelled]
        );
        assert!(observer.done.lock().expect("lock").is_empty());
    }

    #[test]
    fn failing_provider_reports_transport_error() {
        let provider = MockProvider::failing("backend down");
        let observer = RecordingObserver::default();
        let cancel = Arc::new(AtomicBool::new(false));

        let error = provider
            .stream_complete(&request(), &observer, &cancel)
            .expect_err("failing provider must error");

        assert!(matches!(error, ProviderError::Transport(message) if message == "backend down"));
        assert!(observer.tokens.lock().expect("lock").is_empty());
    }

    #[test]
    fn tool_calls_ride_on_successful_completions() {
        let mut arguments = serde_json::Map::new();
        arguments.insert("path".to_string(), json!("out.txt"));

        let provider = MockProvider::scripted(vec!["done".to_string()]).with_tool_calls(vec![
            ToolCall {
                id: "call-1".to_string(),
                name: "write_file".to_string(),
                arguments,
            },
        ]);
        let observer = RecordingObserver::default();
        let cancel = Arc::new(AtomicBool::new(false));

        let response = provider
            .stream_complete(&request(), &observer, &cancel)
            .expect("scripted stream should succeed");

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "write_file");
    }

    #[test]
    fn unavailable_provider_reports_unavailability() {
        let provider = MockProvider::default().unavailable();
        assert!(!provider.is_available());
        assert!(!provider.list_models().is_empty());
    }
}
