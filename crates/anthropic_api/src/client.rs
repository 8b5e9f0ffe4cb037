use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response, StatusCode};

use crate::config::AnthropicApiConfig;
use crate::error::{parse_error_message, AnthropicApiError};
use crate::events::AnthropicStreamEvent;
use crate::payload::{MessagesRequest, MessagesResponse};
use crate::retry::{is_retryable_http_error, retry_delay_ms, MAX_RETRIES};
use crate::sse::SseStreamParser;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct AnthropicApiClient {
    http: Client,
    config: AnthropicApiConfig,
}

impl AnthropicApiClient {
    pub fn new(config: AnthropicApiConfig) -> Result<Self, AnthropicApiError> {
        if config.api_key.trim().is_empty() {
            return Err(AnthropicApiError::MissingApiKey);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AnthropicApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AnthropicApiConfig {
        &self.config
    }

    pub fn build_headers(&self) -> Result<HeaderMap, AnthropicApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            header_value(&self.config.api_key, "x-api-key")?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            header_value(&self.config.version, "anthropic-version")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(user_agent) = self.config.user_agent.as_deref() {
            headers.insert(USER_AGENT, header_value(user_agent, "user-agent")?);
        }
        for (key, value) in &self.config.extra_headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    AnthropicApiError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                header_value(value, key)?,
            );
        }
        Ok(headers)
    }

    fn build_request(
        &self,
        request: &MessagesRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, AnthropicApiError> {
        let headers = self.build_headers()?;
        let mut payload = request.clone();
        payload.stream = stream;
        Ok(self
            .http
            .post(self.config.messages_endpoint())
            .headers(headers)
            .json(&payload))
    }

    pub async fn send_with_retry(
        &self,
        request: &MessagesRequest,
        stream: bool,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, AnthropicApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(AnthropicApiError::Cancelled);
            }

            let response = self.build_request(request, stream)?.send();
            let response = await_or_cancel(response, cancellation)
                .await?
                .map_err(AnthropicApiError::from);

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_else(|_| {
                            status
                                .canonical_reason()
                                .unwrap_or("request failed")
                                .to_string()
                        });
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(AnthropicApiError::Status(status, message));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                    return Err(AnthropicApiError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(AnthropicApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// One-shot (non-streaming) message creation.
    pub async fn messages(
        &self,
        request: &MessagesRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<MessagesResponse, AnthropicApiError> {
        let response = self.send_with_retry(request, false, cancellation).await?;
        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .map_err(AnthropicApiError::from)?;
        serde_json::from_str(&body).map_err(AnthropicApiError::from)
    }

    /// Streams a message, pushing each parsed event into `on_event` in
    /// arrival order. An in-band `error` event aborts the stream.
    pub async fn stream_with_handler<F>(
        &self,
        request: &MessagesRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<(), AnthropicApiError>
    where
        F: FnMut(AnthropicStreamEvent),
    {
        let response = self.send_with_retry(request, true, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(AnthropicApiError::Cancelled);
            }
            let chunk = chunk.map_err(AnthropicApiError::from)?;
            for event in parser.feed(&chunk) {
                if let AnthropicStreamEvent::Error { kind, message } = &event {
                    return Err(AnthropicApiError::StreamFailed {
                        kind: kind.clone(),
                        message: message
                            .clone()
                            .unwrap_or_else(|| "backend reported a stream error".to_owned()),
                    });
                }
                on_event(event);
            }
        }

        if is_cancelled(cancellation) {
            return Err(AnthropicApiError::Cancelled);
        }

        Ok(())
    }

    /// Collect a full event stream into memory.
    pub async fn stream(
        &self,
        request: &MessagesRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Vec<AnthropicStreamEvent>, AnthropicApiError> {
        let mut events = Vec::new();
        self.stream_with_handler(request, cancellation, |event| events.push(event))
            .await?;
        Ok(events)
    }

    /// Lightweight reachability probe.
    ///
    /// An authentication failure still counts as reachable; the probe
    /// answers "is anything listening", not "is the key valid".
    pub async fn probe(&self) -> bool {
        let Ok(headers) = self.build_headers() else {
            return false;
        };

        let request = self
            .http
            .get(self.config.models_endpoint())
            .headers(headers)
            .timeout(Duration::from_secs(5));

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status == StatusCode::UNAUTHORIZED
            }
            Err(_) => false,
        }
    }
}

fn header_value(value: &str, key: &str) -> Result<HeaderValue, AnthropicApiError> {
    HeaderValue::from_str(value)
        .map_err(|_| AnthropicApiError::InvalidBaseUrl(format!("invalid header value for {key}")))
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, AnthropicApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(AnthropicApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(AnthropicApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
