//! End-to-end exercises of the full `StreamParser` state machine across
//! all four surface protocols, driven purely through the public API.

use std::sync::{Arc, Mutex};

use serde_json::json;
use toolcall_middleware::{DownstreamPart, ParseOptions, StreamPart, StreamParser, ToolDefinition};
use toolcall_middleware::protocol::json_tagged::JsonTagged;
use toolcall_middleware::protocol::mixed_json_xml::MixedJsonXml;
use toolcall_middleware::protocol::xml::Xml;
use toolcall_middleware::protocol::yaml_in_xml::YamlInXml;

fn text_delta(s: &str) -> StreamPart {
    StreamPart::TextDelta { id: "0".to_string(), delta: s.to_string() }
}

fn drive(parser: &mut StreamParser<impl toolcall_middleware::Protocol>, chunks: &[&str]) -> Vec<DownstreamPart> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(parser.push(text_delta(chunk)));
    }
    out.extend(parser.push(StreamPart::Finish { reason: "stop".to_string(), usage: None }));
    out
}

fn tool_calls(events: &[DownstreamPart]) -> Vec<(String, String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            DownstreamPart::ToolCall { id, tool_name, input } => Some((id.clone(), tool_name.clone(), input.clone())),
            _ => None,
        })
        .collect()
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        json!({"type": "object", "properties": {"location": {"type": "string"}, "unit": {"type": "string"}}}),
    )
}

/// Streaming search+final Xml exchange across arbitrary chunk boundaries.
#[test]
fn xml_streaming_with_multiple_chunks() {
    let tools = vec![
        ToolDefinition::new("search", json!({"type": "object", "properties": {"query": {"type": "string"}, "limit": {"type": "number"}}})),
        ToolDefinition::new("final", json!({"type": "object", "properties": {"message": {"type": "string"}}})),
    ];
    let mut parser = StreamParser::new(Xml, tools, ParseOptions::default()).unwrap();
    let chunks = [
        "<sea", "rch>\n<qu", "ery>test query</", "query>\n<lim", "it>5</limit>\n</se", "arch>\n\n<fin",
        "al>\n<mess", "age>All done!</mes", "sage>\n</final>",
    ];
    let events = drive(&mut parser, &chunks);
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, "search");
    let v: serde_json::Value = serde_json::from_str(&calls[0].2).unwrap();
    assert_eq!(v["query"], "test query");
    assert_eq!(v["limit"], 5);
    assert_eq!(calls[1].1, "final");
}

/// A JsonTagged tool call split mid-argument, driven end-to-end through the
/// public API.
#[test]
fn json_tagged_end_to_end_scenario() {
    let mut parser = StreamParser::new(JsonTagged::default(), vec![weather_tool()], ParseOptions::default()).unwrap();
    let events = drive(
        &mut parser,
        &[
            "Before ",
            r#"<tool_call>{"na"#,
            r#"me":"get_weather","arguments":{"location":"Seoul","unit":"celsius"}"#,
            "}</tool_call>",
            " After",
        ],
    );
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "get_weather");
    assert_eq!(calls[0].2, r#"{"location":"Seoul","unit":"celsius"}"#);
}

/// A MixedJsonXml tool call assembled across many tiny chunks, including
/// mid-tag splits.
#[test]
fn mixed_json_xml_streaming_assembles_across_tiny_chunks() {
    let tools = vec![ToolDefinition::new(
        "get_weather",
        json!({"type": "object", "properties": {"location": {"type": "string"}}}),
    )];
    let mut parser = StreamParser::new(MixedJsonXml, tools, ParseOptions::default()).unwrap();
    let whole = "<tool_call>\n<function=get_weather>\n<parameter=location>Seoul</parameter>\n</function>\n</tool_call>";
    let chars: Vec<String> = whole.chars().map(|c| c.to_string()).collect();
    let chunk_refs: Vec<&str> = chars.iter().map(|s| s.as_str()).collect();
    let events = drive(&mut parser, &chunk_refs);
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "get_weather");
    assert_eq!(calls[0].2, r#"{"location":"Seoul"}"#);
}

/// Every `tool-input-start` is matched by exactly one `tool-input-end`
/// before `finish`, and both bracket the deltas for that id, over a stream
/// containing several tool calls and interleaved prose.
#[test]
fn tool_input_start_end_bracket_deltas_for_every_call() {
    let tools = vec![
        ToolDefinition::new("search", json!({"type": "object", "properties": {"query": {"type": "string"}}})),
        ToolDefinition::new("final", json!({"type": "object", "properties": {"message": {"type": "string"}}})),
    ];
    let mut parser = StreamParser::new(Xml, tools, ParseOptions::default()).unwrap();
    let events = drive(
        &mut parser,
        &["intro ", "<search><query>q</query></search>", " middle ", "<final><message>done</message></final>", " end"],
    );

    let mut open: Option<String> = None;
    let mut closed_ids = std::collections::HashSet::new();
    for event in &events {
        match event {
            DownstreamPart::ToolInputStart { id, .. } => {
                assert!(open.is_none(), "a new tool-input-start opened while another was still open");
                open = Some(id.clone());
            }
            DownstreamPart::ToolInputDelta { id, .. } => {
                assert_eq!(open.as_deref(), Some(id.as_str()));
            }
            DownstreamPart::ToolInputEnd { id } => {
                assert_eq!(open.as_deref(), Some(id.as_str()));
                closed_ids.insert(id.clone());
                open = None;
            }
            _ => {}
        }
    }
    assert!(open.is_none(), "a tool-input-start was left open at finish");
    assert_eq!(closed_ids.len(), 2);
}

/// Chunking-invariance: the same bytes split in two very different ways
/// produce the same sequence of semantically meaningful downstream events.
#[test]
fn chunking_invariance_across_protocols() {
    let whole = "say hi <search><query>rust</query></search> bye";
    let tools = vec![ToolDefinition::new("search", json!({"type": "object", "properties": {"query": {"type": "string"}}}))];

    let mut as_whole = StreamParser::new(Xml, tools.clone(), ParseOptions::default()).unwrap();
    let events_whole = drive(&mut as_whole, &[whole]);

    let chars: Vec<String> = whole.chars().map(|c| c.to_string()).collect();
    let chunk_refs: Vec<&str> = chars.iter().map(|s| s.as_str()).collect();
    let mut as_chars = StreamParser::new(Xml, tools, ParseOptions::default()).unwrap();
    let events_chars = drive(&mut as_chars, &chunk_refs);

    let summarize = |events: &[DownstreamPart]| -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                DownstreamPart::ToolCall { tool_name, input, .. } => Some(format!("call:{tool_name}:{input}")),
                DownstreamPart::TextDelta { delta, .. } => Some(format!("text:{delta}")),
                _ => None,
            })
            .collect()
    };
    assert_eq!(summarize(&events_whole), summarize(&events_chars));
}

/// A malformed tool body with `emit_raw_tool_call_text_on_error = true`
/// emits the raw segment verbatim as text instead of suppressing it.
#[test]
fn raw_fallback_emits_verbatim_segment_on_malformed_body() {
    let tools = vec![ToolDefinition::new(
        "get_weather",
        json!({"type": "object", "properties": {"location": {"type": "string"}}}),
    )];
    let seen_errors = Arc::new(Mutex::new(0usize));
    let seen_errors_cb = seen_errors.clone();
    let options = ParseOptions {
        on_error: Some(Box::new(move |_msg, _meta| {
            *seen_errors_cb.lock().unwrap() += 1;
        })),
        emit_raw_tool_call_text_on_error: true,
        ..Default::default()
    };
    let mut parser = StreamParser::new(Xml, tools, options).unwrap();
    let events = drive(&mut parser, &["<get_weather><location>Seoul</location> done"]);

    assert_eq!(*seen_errors.lock().unwrap(), 1);
    assert!(!events.iter().any(|e| matches!(e, DownstreamPart::ToolCall { .. })));
    let raw_text_present = events.iter().any(|e| match e {
        DownstreamPart::TextDelta { delta, .. } => delta.contains("<get_weather>"),
        _ => false,
    });
    assert!(raw_text_present);
}

/// A self-closing YamlInXml tag, driven end to end.
#[test]
fn yaml_in_xml_self_closing_end_to_end() {
    let tools = vec![ToolDefinition::new("get_location", json!({"type": "object"}))];
    let mut parser = StreamParser::new(YamlInXml, tools, ParseOptions::default()).unwrap();
    let events = drive(&mut parser, &["<get_location />"]);
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "get_location");
    assert_eq!(calls[0].2, "{}");
}
