//! End-to-end pipeline checks against the deterministic mock provider.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use chat_agent::events::{event_channel, StatusLabel, StreamEvent};
use chat_agent::registry::ModelRegistry;
use chat_agent::session::{SessionConfig, SessionLoop};
use chat_agent::tools::ToolDispatcher;
use provider_mock::MockProvider;

fn drain(rx: &Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(300)) {
        events.push(event);
    }
    events
}

fn mock_session(provider: MockProvider) -> (SessionLoop, Receiver<StreamEvent>) {
    let registry = ModelRegistry::new(vec![Arc::new(provider)]);
    let config = SessionConfig {
        model: "mock-model".to_string(),
        ..SessionConfig::default()
    };
    let (tx, rx) = event_channel();
    (
        SessionLoop::new(registry, ToolDispatcher::new(), config, tx),
        rx,
    )
}

#[test]
fn deltas_reassemble_the_full_response() {
    let (session, rx) = mock_session(MockProvider::default());

    let report = session.run_cycle("say hello").expect("cycle should succeed");
    assert_eq!(report.content, "Hello, world!");

    let events = drain(&rx);
    let concatenated: String = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::TokenDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(concatenated, "Hello, world!");
}

#[test]
fn stream_start_precedes_all_other_events() {
    let (session, rx) = mock_session(MockProvider::default());

    session.run_cycle("say hello").expect("cycle should succeed");

    let events = drain(&rx);
    assert!(matches!(
        events.first(),
        Some(StreamEvent::StreamStart { prompt, .. }) if prompt == "say hello"
    ));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, StreamEvent::StreamStart { .. }))
            .count(),
        1
    );
}

#[test]
fn exactly_one_terminal_event_and_nothing_after_it() {
    let (session, rx) = mock_session(MockProvider::default());

    session.run_cycle("say hello").expect("cycle should succeed");

    let events = drain(&rx);
    let terminal_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(position, event)| match event {
            StreamEvent::StreamEnd { .. } | StreamEvent::StreamError { .. } => Some(position),
            _ => None,
        })
        .collect();
    assert_eq!(terminal_positions.len(), 1, "events: {events:?}");

    let terminal = terminal_positions[0];
    assert!(
        events[terminal + 1..]
            .iter()
            .all(|event| !matches!(event, StreamEvent::TokenDelta { .. })),
        "no deltas may follow the terminal event"
    );
    assert!(matches!(
        events.last(),
        Some(StreamEvent::StatusUpdate {
            status: StatusLabel::Complete,
            ..
        })
    ));
}

#[test]
fn all_events_share_the_cycle_stream_id() {
    let (session, rx) = mock_session(MockProvider::default());

    let report = session.run_cycle("say hello").expect("cycle should succeed");

    let events = drain(&rx);
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|event| event.stream_id() == &report.stream_id));
}
