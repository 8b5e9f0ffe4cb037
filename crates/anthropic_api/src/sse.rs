use serde_json::Value;

use crate::events::{AnthropicStreamEvent, ContentBlockInfo};

/// Incremental parser for Messages API SSE streams.
///
/// Frames arrive as `event: <name>\ndata: <json>\n\n`; the JSON payload
/// repeats the event type in a `type` field, which is what gets mapped.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<AnthropicStreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(payload) = extract_data_payload(&frame) {
                if payload.is_empty() {
                    continue;
                }

                if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                    if let Some(event) = map_event(value) {
                        events.push(event);
                    }
                }
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<AnthropicStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_event(value: Value) -> Option<AnthropicStreamEvent> {
    let event_type = value.get("type")?.as_str()?;

    match event_type {
        "message_start" => {
            let message = value.get("message")?;
            Some(AnthropicStreamEvent::MessageStart {
                id: string_field(message, "id"),
                model: string_field(message, "model"),
                input_tokens: message
                    .get("usage")
                    .and_then(|usage| usage.get("input_tokens"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
            })
        }
        "content_block_start" => {
            let index = index_field(&value)?;
            let block = value
                .get("content_block")
                .map(map_content_block)
                .unwrap_or(ContentBlockInfo::Unknown);
            Some(AnthropicStreamEvent::ContentBlockStart { index, block })
        }
        "content_block_delta" => {
            let index = index_field(&value)?;
            let delta = value.get("delta")?;
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => Some(AnthropicStreamEvent::TextDelta {
                    index,
                    text: string_field(delta, "text"),
                }),
                Some("input_json_delta") => Some(AnthropicStreamEvent::InputJsonDelta {
                    index,
                    partial_json: string_field(delta, "partial_json"),
                }),
                _ => None,
            }
        }
        "content_block_stop" => Some(AnthropicStreamEvent::ContentBlockStop {
            index: index_field(&value)?,
        }),
        "message_delta" => {
            let stop_reason = value
                .get("delta")
                .and_then(|delta| delta.get("stop_reason"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let output_tokens = value
                .get("usage")
                .and_then(|usage| usage.get("output_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            Some(AnthropicStreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            })
        }
        "message_stop" => Some(AnthropicStreamEvent::MessageStop),
        "ping" => Some(AnthropicStreamEvent::Ping),
        "error" => {
            let error = value.get("error");
            let kind = error
                .and_then(|error| error.get("type"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let message = error
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            Some(AnthropicStreamEvent::Error { kind, message })
        }
        _ => None,
    }
}

fn map_content_block(block: &Value) -> ContentBlockInfo {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => ContentBlockInfo::Text,
        Some("tool_use") => ContentBlockInfo::ToolUse {
            id: string_field(block, "id"),
            name: string_field(block, "name"),
        },
        _ => ContentBlockInfo::Unknown,
    }
}

fn index_field(value: &Value) -> Option<usize> {
    value.get("index").and_then(Value::as_u64).map(|v| v as usize)
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
