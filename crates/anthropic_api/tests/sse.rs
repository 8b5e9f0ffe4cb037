use anthropic_api::{AnthropicStreamEvent, ContentBlockInfo, SseStreamParser};

#[test]
fn sse_framing_parses_text_deltas() {
    let payload = concat!(
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n"
    );

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(
        events,
        vec![
            AnthropicStreamEvent::TextDelta {
                index: 0,
                text: "hel".to_string(),
            },
            AnthropicStreamEvent::TextDelta {
                index: 0,
                text: "lo".to_string(),
            },
        ]
    );
}

#[test]
fn sse_parser_maps_full_message_lifecycle() {
    let payload = concat!(
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4-20250514\",\"usage\":{\"input_tokens\":12}}}\n\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\n",
        "data: {\"type\":\"message_stop\"}\n\n"
    );

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(events.len(), 6);
    assert_eq!(
        events[0],
        AnthropicStreamEvent::MessageStart {
            id: "msg_1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            input_tokens: 12,
        }
    );
    assert_eq!(
        events[1],
        AnthropicStreamEvent::ContentBlockStart {
            index: 0,
            block: ContentBlockInfo::Text,
        }
    );
    assert_eq!(
        events[4],
        AnthropicStreamEvent::MessageDelta {
            stop_reason: Some("end_turn".to_string()),
            output_tokens: 4,
        }
    );
    assert_eq!(events[5], AnthropicStreamEvent::MessageStop);
}

#[test]
fn sse_parser_maps_tool_use_blocks() {
    let payload = concat!(
        "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"write_file\"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\":\"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"a.txt\\\"}\"}}\n\n",
        "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n"
    );

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0],
        AnthropicStreamEvent::ContentBlockStart {
            index: 1,
            block: ContentBlockInfo::ToolUse {
                id: "toolu_1".to_string(),
                name: "write_file".to_string(),
            },
        }
    );
    assert_eq!(
        events[1],
        AnthropicStreamEvent::InputJsonDelta {
            index: 1,
            partial_json: "{\"path\":".to_string(),
        }
    );
    assert_eq!(events[3], AnthropicStreamEvent::ContentBlockStop { index: 1 });
}

#[test]
fn sse_parser_handles_split_frames_incrementally() {
    let mut parser = SseStreamParser::default();
    assert!(parser
        .feed(b"data: {\"type\":\"content_block_delta\",\"index\":0,")
        .is_empty());
    assert!(!parser.is_empty_buffer());

    let mut events =
        parser.feed(b"\"delta\":{\"type\":\"text_delta\",\"text\":\"abc\"}}\n\n");
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events.pop(),
        Some(AnthropicStreamEvent::TextDelta { .. })
    ));
    assert!(parser.is_empty_buffer());
}

#[test]
fn sse_parser_ignores_unknown_and_malformed() {
    let payload = concat!(
        "data: {\"type\":\"unknown_event\",\"foo\":\"bar\"}\n\n",
        "data: {broken-json\n\n",
        "event: keepalive\n\n",
        "data: {\"type\":\"ping\"}\n\n"
    );

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(events, vec![AnthropicStreamEvent::Ping]);
}

#[test]
fn sse_parser_surfaces_error_events() {
    let payload = "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(
        events,
        vec![AnthropicStreamEvent::Error {
            kind: Some("overloaded_error".to_string()),
            message: Some("Overloaded".to_string()),
        }]
    );
}
