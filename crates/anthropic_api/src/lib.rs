//! Minimal Anthropic Messages API transport.
//!
//! Exposes a cancellation-aware async client over the `/v1/messages`
//! endpoint, an incremental SSE parser producing typed stream events,
//! and a bounded retry policy for transient failures. Canonical
//! completion types live in `model_provider`; this crate deals only in
//! wire shapes.

mod client;
mod config;
mod error;
mod events;
mod payload;
mod retry;
mod sse;

pub use client::{AnthropicApiClient, CancellationSignal};
pub use config::{AnthropicApiConfig, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_VERSION};
pub use error::{parse_error_message, AnthropicApiError};
pub use events::{AnthropicStreamEvent, ContentBlockInfo};
pub use payload::{ContentBlock, MessagesRequest, MessagesResponse, WireMessage, WireTool, WireUsage};
pub use retry::{is_retryable_http_error, retry_delay_ms, MAX_RETRIES};
pub use sse::SseStreamParser;
