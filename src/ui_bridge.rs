//! Bridges provider stream callbacks onto the UI event channel.
//!
//! Providers deliver tokens at network cadence; the renderer wants
//! steady batches. The bridge buffers tokens and a dedicated flush
//! thread drains them every `FLUSH_INTERVAL`, emitting a status refresh
//! alongside each non-empty flush. Terminal signals travel over a single-slot channel so the
//! provider thread is never blocked by the flusher.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use model_provider::{CompletionResponse, ProviderError, StreamObserver};

use crate::events::{EventSender, StatusLabel, StreamEvent, StreamId};
use crate::stream::StreamAccumulator;

/// Interval between pending-text flushes to the renderer.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(40);

/// Terminal outcome of one stream, delivered to the flush thread. The
/// accumulator already holds the final usage, so success carries no
/// payload.
enum EndSignal {
    Done,
    Failed(ProviderError),
}

/// Per-stream observer that batches tokens for the UI.
pub struct UiStreamBridge {
    stream_id: StreamId,
    model: String,
    provider: String,
    accumulator: StreamAccumulator,
    pending: Mutex<String>,
    end_tx: SyncSender<EndSignal>,
    terminal: Mutex<bool>,
    terminal_signal: Condvar,
}

impl UiStreamBridge {
    /// Creates the bridge and starts its flush thread.
    pub fn spawn(
        stream_id: StreamId,
        model: impl Into<String>,
        provider: impl Into<String>,
        events: EventSender,
    ) -> Arc<Self> {
        let model = model.into();
        let (end_tx, end_rx) = sync_channel(1);

        let bridge = Arc::new(Self {
            stream_id,
            accumulator: StreamAccumulator::new(model.clone()),
            model,
            provider: provider.into(),
            pending: Mutex::new(String::new()),
            end_tx,
            terminal: Mutex::new(false),
            terminal_signal: Condvar::new(),
        });

        let flusher = Arc::clone(&bridge);
        let spawned = thread::Builder::new()
            .name("stream-flush".to_string())
            .spawn(move || flusher.run_flush_loop(end_rx, events));
        if let Err(error) = spawned {
            tracing::warn!(stream_id = %bridge.stream_id, "failed to spawn flush thread: {error}");
            bridge.mark_terminal();
        }

        bridge
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    /// Blocks until the terminal event has been emitted, or the timeout
    /// elapses. Returns whether the terminal flush completed.
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        let guard = self.lock_terminal();
        let guard = match self
            .terminal_signal
            .wait_timeout_while(guard, timeout, |done| !*done)
        {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        *guard
    }

    fn lock_terminal(&self) -> MutexGuard<'_, bool> {
        match self.terminal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, String> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mark_terminal(&self) {
        *self.lock_terminal() = true;
        self.terminal_signal.notify_all();
    }

    fn run_flush_loop(&self, end_rx: Receiver<EndSignal>, events: EventSender) {
        loop {
            match end_rx.recv_timeout(FLUSH_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {
                    // A quiet tick emits nothing; the running status only
                    // accompanies actual progress.
                    if self.flush_pending(&events) {
                        self.emit_status(&events, StatusLabel::Running);
                    }
                }
                Ok(signal) => {
                    self.flush_pending(&events);
                    match signal {
                        EndSignal::Done => {
                            events.send(StreamEvent::StreamEnd {
                                stream_id: self.stream_id.clone(),
                                tokens_used: self.accumulator.tokens_used(),
                                cost_usd: self.accumulator.cost_usd(),
                            });
                            self.emit_status(&events, StatusLabel::Complete);
                        }
                        EndSignal::Failed(error) => {
                            events.send(StreamEvent::StreamError {
                                stream_id: self.stream_id.clone(),
                                error: error.to_string(),
                            });
                            self.emit_status(&events, StatusLabel::Error);
                        }
                    }
                    self.mark_terminal();
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Bridge dropped without a terminal signal; flush what
                    // arrived and unblock any waiters.
                    self.flush_pending(&events);
                    self.mark_terminal();
                    return;
                }
            }
        }
    }

    /// Drains buffered text into one `TokenDelta`. Returns whether
    /// anything was flushed.
    ///
    /// Whitespace-only batches are flushed too; dropping them would lose
    /// token text between deltas and the final content.
    fn flush_pending(&self, events: &EventSender) -> bool {
        let batch = {
            let mut pending = self.lock_pending();
            if pending.is_empty() {
                return false;
            }
            std::mem::take(&mut *pending)
        };

        events.send(StreamEvent::TokenDelta {
            stream_id: self.stream_id.clone(),
            text: batch,
        });
        true
    }

    fn emit_status(&self, events: &EventSender, status: StatusLabel) {
        events.send(StreamEvent::StatusUpdate {
            stream_id: self.stream_id.clone(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            tokens_used: self.accumulator.tokens_used(),
            cost_usd: self.accumulator.cost_usd(),
            status,
        });
    }

    fn signal_end(&self, signal: EndSignal) {
        match self.end_tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                // The slot is taken only if a terminal signal already
                // landed; hand this one to a detached sender anyway so
                // the callback never blocks.
                let tx = self.end_tx.clone();
                let spawned = thread::Builder::new()
                    .name("stream-end".to_string())
                    .spawn(move || {
                        let _ = tx.send(signal);
                    });
                if let Err(error) = spawned {
                    tracing::warn!("failed to spawn end-signal thread: {error}");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl StreamObserver for UiStreamBridge {
    fn on_token(&self, text: &str) {
        self.accumulator.on_token(text);
        self.lock_pending().push_str(text);
    }

    fn on_done(&self, response: &CompletionResponse) {
        self.accumulator.on_done(response);
        self.signal_end(EndSignal::Done);
    }

    fn on_error(&self, error: &ProviderError) {
        self.accumulator.on_error(error);
        self.signal_end(EndSignal::Failed(error.clone()));
    }
}
