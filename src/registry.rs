//! Model routing across registered providers, with ordered fallback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use model_provider::{
    CancelSignal, CompletionRequest, CompletionResponse, ModelDescriptor, Provider, ProviderError,
    ProviderKind, StreamObserver,
};

/// Routing failure surfaced to the orchestration layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// No provider serves the model and no heuristic applied.
    UnknownModel(String),
    /// The cancel signal fired; the chain stops immediately.
    Cancelled,
    /// A backend failed after tokens had already streamed. Retrying the
    /// next model would duplicate visible output, so the chain stops.
    MidStreamFailure {
        model: String,
        error: ProviderError,
    },
    /// Every candidate in the chain was skipped or failed cleanly.
    AllBackendsUnavailable { attempted: Vec<String> },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModel(model) => write!(f, "unknown model: {model}"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::MidStreamFailure { model, error } => {
                write!(f, "model {model} failed mid-stream: {error}")
            }
            Self::AllBackendsUnavailable { attempted } => {
                write!(f, "all backends unavailable: {}", attempted.join(", "))
            }
        }
    }
}

impl std::error::Error for RouterError {}

/// Outcome of a routed completion: the response plus which model and
/// provider actually served it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCompletion {
    pub response: CompletionResponse,
    pub model: String,
    pub provider: String,
}

/// Registry of providers with a model-id index.
pub struct ModelRegistry {
    providers: Vec<Arc<dyn Provider>>,
    index: BTreeMap<String, usize>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut registry = Self {
            providers,
            index: BTreeMap::new(),
        };
        registry.rebuild();
        registry
    }

    /// Re-queries every provider's model list and rebuilds the index.
    ///
    /// On a duplicate model id the earliest-registered provider wins.
    pub fn rebuild(&mut self) {
        self.index.clear();

        for (position, provider) in self.providers.iter().enumerate() {
            for model in provider.list_models() {
                if let Some(existing) = self.index.get(&model.id) {
                    tracing::warn!(
                        model = %model.id,
                        kept = self.providers[*existing].name(),
                        ignored = provider.name(),
                        "duplicate model id; keeping earlier provider"
                    );
                    continue;
                }
                self.index.insert(model.id, position);
            }
        }
    }

    /// All models currently advertised, in provider registration order.
    #[must_use]
    pub fn all_models(&self) -> Vec<ModelDescriptor> {
        self.providers
            .iter()
            .flat_map(|provider| provider.list_models())
            .collect()
    }

    /// Maps a model id to its provider.
    ///
    /// Exact index matches win; otherwise a name heuristic routes to a
    /// provider family so users can type model ids the catalog has not
    /// caught up with.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn Provider>, RouterError> {
        if let Some(position) = self.index.get(model) {
            return Ok(Arc::clone(&self.providers[*position]));
        }

        if let Some(kind) = heuristic_kind(model) {
            if let Some(provider) = self
                .providers
                .iter()
                .find(|provider| provider.kind() == kind)
            {
                tracing::warn!(
                    model,
                    provider = provider.name(),
                    "model not in catalog; routed by name heuristic"
                );
                return Ok(Arc::clone(provider));
            }
        }

        Err(RouterError::UnknownModel(model.to_string()))
    }

    /// Streams a completion through the first candidate that succeeds.
    ///
    /// Candidates are tried strictly in the given order. Exactly one
    /// terminal callback reaches `observer` across the whole call.
    pub fn stream_with_fallback(
        &self,
        request: &CompletionRequest,
        chain: &[String],
        observer: &dyn StreamObserver,
        cancel: &CancelSignal,
    ) -> Result<RoutedCompletion, RouterError> {
        let mut attempted = Vec::new();

        for candidate in chain {
            let provider = match self.resolve(candidate) {
                Ok(provider) => provider,
                Err(_) => {
                    tracing::warn!(model = %candidate, "skipping unresolvable model");
                    attempted.push(candidate.clone());
                    continue;
                }
            };

            if !provider.is_available() {
                tracing::warn!(
                    model = %candidate,
                    provider = provider.name(),
                    "skipping unavailable provider"
                );
                attempted.push(candidate.clone());
                continue;
            }

            let attempt = AttemptObserver::new(observer);
            let retargeted = request.with_model(candidate.clone());

            match provider.stream_complete(&retargeted, &attempt, cancel) {
                Ok(response) => {
                    return Ok(RoutedCompletion {
                        response,
                        model: candidate.clone(),
                        provider: provider.name().to_string(),
                    });
                }
                Err(error) if error.is_cancellation() => {
                    observer.on_error(&error);
                    return Err(RouterError::Cancelled);
                }
                Err(error) if attempt.saw_tokens() => {
                    observer.on_error(&error);
                    return Err(RouterError::MidStreamFailure {
                        model: candidate.clone(),
                        error,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        model = %candidate,
                        provider = provider.name(),
                        "completion failed, trying next candidate: {error}"
                    );
                    attempted.push(candidate.clone());
                }
            }
        }

        let error = ProviderError::Transport(format!(
            "all backends unavailable: {}",
            attempted.join(", ")
        ));
        observer.on_error(&error);
        Err(RouterError::AllBackendsUnavailable { attempted })
    }
}

/// Per-attempt observer wrapper.
///
/// Forwards tokens and completion, but holds back errors so a cleanly
/// failed attempt does not emit a premature terminal callback.
struct AttemptObserver<'a> {
    inner: &'a dyn StreamObserver,
    tokens_seen: AtomicBool,
}

impl<'a> AttemptObserver<'a> {
    fn new(inner: &'a dyn StreamObserver) -> Self {
        Self {
            inner,
            tokens_seen: AtomicBool::new(false),
        }
    }

    fn saw_tokens(&self) -> bool {
        self.tokens_seen.load(Ordering::Acquire)
    }
}

impl StreamObserver for AttemptObserver<'_> {
    fn on_token(&self, text: &str) {
        self.tokens_seen.store(true, Ordering::Release);
        self.inner.on_token(text);
    }

    fn on_done(&self, response: &CompletionResponse) {
        self.inner.on_done(response);
    }

    fn on_error(&self, error: &ProviderError) {
        // The caller decides whether this attempt's failure is terminal;
        // forwarding here would end the stream prematurely.
        tracing::debug!("attempt error withheld from observer: {error}");
    }
}

fn heuristic_kind(model: &str) -> Option<ProviderKind> {
    let lower = model.to_ascii_lowercase();
    if lower.contains("claude") {
        Some(ProviderKind::Anthropic)
    } else if lower.contains("gpt") {
        Some(ProviderKind::OpenAi)
    } else if lower.contains("llama") || lower.contains("local") || lower.contains("ollama") {
        Some(ProviderKind::Local)
    } else {
        None
    }
}
