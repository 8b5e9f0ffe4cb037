//! Tracing setup for the binary.
//!
//! Logs go to stderr so they never interleave with the rendered stream
//! on stdout. The `CHAT_AGENT_LOG` variable takes the usual env-filter
//! syntax and defaults to `info`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "CHAT_AGENT_LOG";

pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
