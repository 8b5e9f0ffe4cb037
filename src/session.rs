//! Orchestration of one prompt/completion/tool cycle.
//!
//! A cycle resolves the primary model up front, announces the stream,
//! runs the routed completion through the UI bridge, waits for the
//! terminal flush, then executes any tool calls the response requested.
//! Tool progress is reported after the terminal event; a failed tool
//! call is reported but never aborts the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use model_provider::{CancelSignal, CompletionRequest, Message, ToolCall};

use crate::events::{EventSender, StreamEvent, StreamId, ToolCallPhase};
use crate::registry::{ModelRegistry, RouterError};
use crate::tools::{ToolDispatcher, ToolOutcome};
use crate::ui_bridge::UiStreamBridge;

const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(25);
const TERMINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Streaming,
    ToolExecuting,
}

/// Per-session completion settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Primary model id; must resolve before a stream starts.
    pub model: String,
    /// Additional candidates tried in order after the primary.
    pub fallback_chain: Vec<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Wall-clock budget for one cycle; expiry cancels the stream.
    pub deadline: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            fallback_chain: Vec::new(),
            system_prompt: None,
            max_tokens: 4096,
            temperature: 0.7,
            deadline: None,
        }
    }
}

/// Outcome of one executed tool call, dispatch failures included.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReport {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub stream_id: StreamId,
    pub model: String,
    pub provider: String,
    pub content: String,
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub tool_reports: Vec<ToolReport>,
}

/// Supplies prompts to `run_loop`; `None` ends the session.
pub trait PromptSource {
    fn next_prompt(&mut self) -> Option<String>;
}

/// Drives prompt cycles against a registry and tool dispatcher.
pub struct SessionLoop {
    registry: ModelRegistry,
    dispatcher: ToolDispatcher,
    config: SessionConfig,
    events: EventSender,
    phase: Mutex<CyclePhase>,
}

impl SessionLoop {
    #[must_use]
    pub fn new(
        registry: ModelRegistry,
        dispatcher: ToolDispatcher,
        config: SessionConfig,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            config,
            events,
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        *self.lock_phase()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock_phase(&self) -> MutexGuard<'_, CyclePhase> {
        match self.phase.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.lock_phase() = phase;
    }

    /// Consumes prompts until the source runs dry. Cycle failures are
    /// logged and do not end the loop.
    pub fn run_loop(&self, source: &mut dyn PromptSource) {
        while let Some(prompt) = source.next_prompt() {
            let prompt = prompt.trim().to_string();
            if prompt.is_empty() {
                continue;
            }

            match self.run_cycle(&prompt) {
                Ok(report) => {
                    tracing::info!(
                        stream_id = %report.stream_id,
                        model = %report.model,
                        provider = %report.provider,
                        tokens = report.tokens_used,
                        "cycle complete"
                    );
                }
                Err(error) => {
                    tracing::error!("cycle failed: {error}");
                }
            }
        }
    }

    /// Runs one full prompt cycle.
    ///
    /// Configuration problems (an unresolvable primary model) fail here,
    /// before any `StreamStart` is announced.
    pub fn run_cycle(&self, prompt: &str) -> Result<CycleReport, RouterError> {
        let primary = self.registry.resolve(&self.config.model)?;

        let stream_id = StreamId::next();
        self.events.send(StreamEvent::StreamStart {
            stream_id: stream_id.clone(),
            prompt: prompt.to_string(),
            model: self.config.model.clone(),
            provider: primary.name().to_string(),
            at: SystemTime::now(),
        });

        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let cycle_done = Arc::new(AtomicBool::new(false));
        if let Some(deadline) = self.config.deadline {
            spawn_deadline_watchdog(deadline, Arc::clone(&cancel), Arc::clone(&cycle_done));
        }

        let bridge = UiStreamBridge::spawn(
            stream_id.clone(),
            self.config.model.clone(),
            primary.name().to_string(),
            self.events.clone(),
        );

        let mut chain = Vec::with_capacity(1 + self.config.fallback_chain.len());
        chain.push(self.config.model.clone());
        for candidate in &self.config.fallback_chain {
            if !chain.contains(candidate) {
                chain.push(candidate.clone());
            }
        }

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            system: self.config.system_prompt.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: self.dispatcher.definitions(),
            stream: true,
        };

        self.set_phase(CyclePhase::Streaming);
        let routed = self
            .registry
            .stream_with_fallback(&request, &chain, &*bridge, &cancel);
        cycle_done.store(true, Ordering::Release);

        if !bridge.wait_terminal(TERMINAL_FLUSH_TIMEOUT) {
            tracing::warn!(stream_id = %stream_id, "terminal flush timed out");
        }

        let routed = match routed {
            Ok(routed) => routed,
            Err(error) => {
                self.set_phase(CyclePhase::Idle);
                return Err(error);
            }
        };

        let mut tool_reports = Vec::new();
        if !routed.response.tool_calls.is_empty() {
            self.set_phase(CyclePhase::ToolExecuting);
            for call in &routed.response.tool_calls {
                tool_reports.push(self.execute_tool_call(&stream_id, call, &cancel));
            }
        }

        self.set_phase(CyclePhase::Idle);

        Ok(CycleReport {
            stream_id,
            model: routed.model,
            provider: routed.provider,
            content: routed.response.message.content.clone(),
            tokens_used: bridge.accumulator().tokens_used(),
            cost_usd: bridge.accumulator().cost_usd(),
            tool_reports,
        })
    }

    fn execute_tool_call(
        &self,
        stream_id: &StreamId,
        call: &ToolCall,
        cancel: &CancelSignal,
    ) -> ToolReport {
        self.events
            .send(StreamEvent::tool_call_start(stream_id.clone(), call));

        let outcome = match self.dispatcher.dispatch(call, cancel) {
            Ok(outcome) => outcome,
            Err(error) => ToolOutcome::fail(error.to_string()),
        };

        if let Some(error) = outcome.error.as_deref() {
            tracing::warn!(tool = %call.name, call_id = %call.id, "tool call failed: {error}");
        }

        self.events.send(StreamEvent::ToolCall {
            stream_id: stream_id.clone(),
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: serde_json::Value::Object(call.arguments.clone()),
            phase: ToolCallPhase::End,
            result: outcome.success.then(|| outcome.payload.clone()),
            error: outcome.error.clone(),
        });

        ToolReport {
            call: call.clone(),
            outcome,
        }
    }
}

fn spawn_deadline_watchdog(deadline: Duration, cancel: CancelSignal, cycle_done: Arc<AtomicBool>) {
    let started = Instant::now();
    let spawned = thread::Builder::new()
        .name("deadline-watchdog".to_string())
        .spawn(move || loop {
            if cycle_done.load(Ordering::Acquire) {
                return;
            }
            if started.elapsed() >= deadline {
                tracing::warn!("cycle deadline expired; cancelling stream");
                cancel.store(true, Ordering::Release);
                return;
            }
            thread::sleep(WATCHDOG_POLL_INTERVAL);
        });
    if let Err(error) = spawned {
        tracing::warn!("failed to spawn deadline watchdog: {error}");
    }
}
