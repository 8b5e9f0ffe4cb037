use anthropic_api::{ContentBlock, MessagesRequest, MessagesResponse, WireMessage, WireTool};
use serde_json::{json, Value};

#[test]
fn request_omits_empty_optional_fields() {
    let request = MessagesRequest::new(
        "claude-3-5-haiku-20241022",
        256,
        vec![WireMessage::user("hello")],
    );

    let value = serde_json::to_value(&request).expect("request serializes");
    assert_eq!(value["model"], "claude-3-5-haiku-20241022");
    assert_eq!(value["max_tokens"], 256);
    assert_eq!(value["messages"][0]["role"], "user");
    assert!(value.get("system").is_none());
    assert!(value.get("temperature").is_none());
    assert!(value.get("tools").is_none());
}

#[test]
fn request_carries_system_and_tools_when_set() {
    let mut request = MessagesRequest::new(
        "claude-sonnet-4-20250514",
        1024,
        vec![
            WireMessage::user("write a file"),
            WireMessage::assistant("sure"),
            WireMessage::user("go ahead"),
        ],
    );
    request.system = Some("You are a helpful assistant.".to_string());
    request.temperature = Some(0.2);
    request.stream = true;
    request.tools = vec![WireTool {
        name: "write_file".to_string(),
        description: Some("Write content to a file".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        }),
    }];

    let value = serde_json::to_value(&request).expect("request serializes");
    assert_eq!(value["system"], "You are a helpful assistant.");
    assert_eq!(value["temperature"], 0.2);
    assert_eq!(value["stream"], true);
    assert_eq!(value["tools"][0]["name"], "write_file");
    assert_eq!(value["tools"][0]["input_schema"]["type"], "object");
}

#[test]
fn response_parses_text_and_tool_use_blocks() {
    let body = json!({
        "id": "msg_abc",
        "model": "claude-sonnet-4-20250514",
        "content": [
            {"type": "text", "text": "Writing the file now."},
            {"type": "tool_use", "id": "toolu_1", "name": "write_file",
             "input": {"path": "notes.txt", "content": "hi"}},
            {"type": "server_tool_use", "id": "x"},
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 30, "output_tokens": 12},
    })
    .to_string();

    let response: MessagesResponse = serde_json::from_str(&body).expect("response parses");
    assert_eq!(response.id, "msg_abc");
    assert_eq!(response.text(), "Writing the file now.");
    assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
    assert_eq!(response.usage.input_tokens, 30);
    assert_eq!(response.usage.output_tokens, 12);

    assert_eq!(response.content.len(), 3);
    match &response.content[1] {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "toolu_1");
            assert_eq!(name, "write_file");
            assert_eq!(input["path"], "notes.txt");
        }
        other => panic!("expected tool_use block, got {other:?}"),
    }
    assert_eq!(response.content[2], ContentBlock::Unknown);
}

#[test]
fn response_tolerates_missing_optional_fields() {
    let body = json!({"id": "msg_min", "model": "claude-3-5-haiku-20241022"}).to_string();

    let response: MessagesResponse = serde_json::from_str(&body).expect("minimal response parses");
    assert!(response.content.is_empty());
    assert!(response.stop_reason.is_none());
    assert_eq!(response.usage.input_tokens, 0);
    assert_eq!(response.text(), "");
}

#[test]
fn stream_flag_round_trips_through_json() {
    let mut request = MessagesRequest::new("m", 64, vec![WireMessage::user("x")]);
    request.stream = true;

    let value: Value = serde_json::to_value(&request).expect("serializes");
    let parsed: MessagesRequest = serde_json::from_value(value).expect("deserializes");
    assert!(parsed.stream);
}
