use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum AnthropicApiError {
    MissingApiKey,
    InvalidBaseUrl(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Serde(JsonError),
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    StreamFailed {
        kind: Option<String>,
        message: String,
    },
    Cancelled,
    Unknown(String),
}

impl AnthropicApiError {
    /// True for deadline/explicit-cancel failures so callers can surface
    /// them distinctly from transport errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

impl fmt::Display for AnthropicApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "API key is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error:?})"
                )
            }
            Self::StreamFailed { kind, message } => match kind {
                Some(kind) if !kind.trim().is_empty() => {
                    write!(f, "stream failed ({kind}): {message}")
                }
                _ => write!(f, "stream failed: {message}"),
            },
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AnthropicApiError {}

impl From<reqwest::Error> for AnthropicApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for AnthropicApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a human-readable message from an error response body.
///
/// Bodies follow `{"type":"error","error":{"type":..,"message":..}}`;
/// anything else falls back to the raw body or the status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let parsed = match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload,
        Err(_) => return fallback_message(status, body),
    };

    if let Some(error) = parsed.value {
        let message = error
            .message
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let kind = error
            .type_
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match (kind, message) {
            (Some(kind), Some(message)) => return format!("{kind}: {message}"),
            (None, Some(message)) => return message.to_string(),
            (Some(kind), None) => return kind.to_string(),
            (None, None) => {}
        }
    }

    fallback_message(status, body)
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
