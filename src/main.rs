use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use chat_agent::config::AppConfig;
use chat_agent::events::event_channel;
use chat_agent::registry::ModelRegistry;
use chat_agent::render::spawn_renderer;
use chat_agent::session::{PromptSource, SessionLoop};
use chat_agent::{logging, tools};

/// Reads one prompt per line from stdin. EOF or an exit command ends
/// the session.
struct StdinPromptSource {
    stdin: io::Stdin,
}

impl StdinPromptSource {
    fn new() -> Self {
        Self { stdin: io::stdin() }
    }
}

impl PromptSource for StdinPromptSource {
    fn next_prompt(&mut self) -> Option<String> {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match self.stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let prompt = line.trim().to_string();
                if prompt == "exit" || prompt == "quit" {
                    None
                } else {
                    Some(prompt)
                }
            }
        }
    }
}

fn main() -> ExitCode {
    logging::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let providers = match config.build_providers() {
        Ok(providers) => providers,
        Err(error) => {
            eprintln!("startup error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let registry = ModelRegistry::new(providers);
    let dispatcher: tools::ToolDispatcher = config.build_dispatcher();

    let (events, rx) = event_channel();
    let renderer = match spawn_renderer(rx) {
        Ok(handle) => handle,
        Err(error) => {
            eprintln!("startup error: failed to spawn renderer thread: {error}");
            return ExitCode::FAILURE;
        }
    };

    let session = SessionLoop::new(registry, dispatcher, config.session_config(), events);
    let mut prompts = StdinPromptSource::new();
    session.run_loop(&mut prompts);

    // Dropping the session drops the last event sender, which lets the
    // renderer drain and exit.
    drop(session);
    if renderer.join().is_err() {
        tracing::error!("renderer thread panicked");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
