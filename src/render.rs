//! Plain-text renderer draining the UI event channel to stdout.

use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use crate::events::{StatusLabel, StreamEvent, ToolCallPhase};

/// Spawns the renderer thread. It exits when every sender is gone.
///
/// Spawn failure is returned to the caller; without a renderer the
/// channel would fill and stall the pipeline, so starting without one
/// is not an option.
pub fn spawn_renderer(rx: Receiver<StreamEvent>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("renderer".to_string())
        .spawn(move || render_loop(rx))
}

fn render_loop(rx: Receiver<StreamEvent>) {
    let mut stdout = io::stdout();

    while let Ok(event) = rx.recv() {
        match event {
            StreamEvent::StreamStart {
                model, provider, ..
            } => {
                let _ = writeln!(stdout, "[{provider}/{model}]");
            }
            StreamEvent::TokenDelta { text, .. } => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            StreamEvent::StreamEnd {
                tokens_used,
                cost_usd,
                ..
            } => {
                let _ = writeln!(stdout, "\n({tokens_used} tokens, ${cost_usd:.4})");
            }
            StreamEvent::StreamError { error, .. } => {
                let _ = writeln!(stdout, "\nerror: {error}");
            }
            StreamEvent::ToolCall {
                name,
                phase,
                error,
                ..
            } => match phase {
                ToolCallPhase::Start => {
                    let _ = writeln!(stdout, "-> running tool {name}");
                }
                ToolCallPhase::End => match error {
                    Some(error) => {
                        let _ = writeln!(stdout, "-> tool {name} failed: {error}");
                    }
                    None => {
                        let _ = writeln!(stdout, "-> tool {name} finished");
                    }
                },
            },
            StreamEvent::StatusUpdate { status, .. } => {
                // The status line only matters at the terminal edge; the
                // running refreshes are for richer frontends.
                if status == StatusLabel::Running {
                    continue;
                }
            }
            // Stream events are non-exhaustive; unknown variants are
            // skipped rather than breaking the drain loop.
            _ => {}
        }
    }
}
