/// Typed view of one Messages API stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnthropicStreamEvent {
    MessageStart {
        id: String,
        model: String,
        input_tokens: u32,
    },
    ContentBlockStart {
        index: usize,
        block: ContentBlockInfo,
    },
    TextDelta {
        index: usize,
        text: String,
    },
    /// Partial JSON for a tool_use block's input, accumulated per index.
    InputJsonDelta {
        index: usize,
        partial_json: String,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },
    MessageStop,
    Ping,
    Error {
        kind: Option<String>,
        message: Option<String>,
    },
}

/// Block identity carried by `content_block_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlockInfo {
    Text,
    ToolUse { id: String, name: String },
    Unknown,
}
