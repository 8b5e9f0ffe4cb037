//! Streaming response accumulation and cost estimation.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use model_provider::{CompletionResponse, ProviderError, StreamObserver, TokenUsage};

/// Per-1k-token USD pricing estimate for a model id.
///
/// Mid-stream token counts are an estimate until the backend reports
/// authoritative usage; pricing here follows the same spirit.
#[must_use]
pub fn estimate_cost(input_tokens: u32, output_tokens: u32, model: &str) -> f64 {
    let (input_rate, output_rate) = if model.contains("haiku") {
        (0.00025, 0.00125)
    } else if model.contains("gpt-4o-mini") {
        (0.00015, 0.0006)
    } else if model.contains("gpt") {
        (0.005, 0.015)
    } else if model.contains("claude") {
        (0.003, 0.015)
    } else {
        // Local and mock models bill nothing.
        (0.0, 0.0)
    };

    (f64::from(input_tokens) / 1000.0) * input_rate
        + (f64::from(output_tokens) / 1000.0) * output_rate
}

#[derive(Debug, Default)]
struct AccumulatorState {
    content: String,
    estimated_tokens: u32,
    final_usage: Option<TokenUsage>,
    cost_usd: f64,
    error: Option<String>,
    first_token_at: Option<Instant>,
    done: bool,
}

/// Thread-safe accumulator for one streamed completion.
///
/// Implements `StreamObserver` so providers can feed it directly; the
/// UI bridge layers batching on top.
#[derive(Debug)]
pub struct StreamAccumulator {
    model: String,
    state: Mutex<AccumulatorState>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: Mutex::new(AccumulatorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AccumulatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn content(&self) -> String {
        self.state().content.clone()
    }

    /// Final reported token count, or a chars/4 running estimate while
    /// the stream is still in flight.
    #[must_use]
    pub fn tokens_used(&self) -> u32 {
        let state = self.state();
        match state.final_usage {
            Some(usage) => usage.total_tokens,
            None => state.estimated_tokens,
        }
    }

    #[must_use]
    pub fn cost_usd(&self) -> f64 {
        let state = self.state();
        if state.final_usage.is_some() {
            state.cost_usd
        } else {
            estimate_cost(0, state.estimated_tokens, &self.model)
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().done
    }

    /// Time since the first token arrived, if any has.
    #[must_use]
    pub fn elapsed_since_first_token(&self) -> Option<Duration> {
        self.state().first_token_at.map(|at| at.elapsed())
    }
}

impl StreamObserver for StreamAccumulator {
    fn on_token(&self, text: &str) {
        let mut state = self.state();
        if state.first_token_at.is_none() {
            state.first_token_at = Some(Instant::now());
        }
        state.content.push_str(text);
        state.estimated_tokens = (state.content.len() / 4) as u32;
    }

    fn on_done(&self, response: &CompletionResponse) {
        let mut state = self.state();
        state.final_usage = Some(response.usage);
        state.cost_usd = estimate_cost(
            response.usage.input_tokens,
            response.usage.output_tokens,
            &self.model,
        );
        state.done = true;
    }

    fn on_error(&self, error: &ProviderError) {
        let mut state = self.state();
        state.error = Some(error.to_string());
        state.done = true;
    }
}
